use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::keypoint::Pose;

/// 推定器が出力した1フレーム分のキーポイント
///
/// `index` は到着順のシーケンス番号、`timestamp_ms` はキャプチャ時刻。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub index: u64,
    pub timestamp_ms: u64,
    #[serde(rename = "keypoints")]
    pub pose: Pose,
}

impl Frame {
    pub fn new(index: u64, timestamp_ms: u64, pose: Pose) -> Self {
        Self {
            index,
            timestamp_ms,
            pose,
        }
    }

    /// キーポイントが一つもないフレーム（推定タイムアウト時に使う）
    pub fn indeterminate(index: u64, timestamp_ms: u64) -> Self {
        Self::new(index, timestamp_ms, Pose::default())
    }
}

/// キャプチャ側から渡される生画像
///
/// 画素の解釈は推定器に任せる。
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub index: u64,
    pub timestamp_ms: u64,
    pub width: u16,
    pub height: u16,
    pub data: Bytes,
}

impl CapturedImage {
    pub fn new(index: u64, timestamp_ms: u64, width: u16, height: u16, data: Bytes) -> Self {
        Self {
            index,
            timestamp_ms,
            width,
            height,
            data,
        }
    }
}
