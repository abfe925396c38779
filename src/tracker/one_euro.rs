use std::f32::consts::PI;

/// 1次ローパス。前回値がなければ入力をそのまま返す
fn low_pass(prev: &mut Option<f32>, value: f32, alpha: f32) -> f32 {
    let out = prev.map_or(value, |p| p + alpha * (value - p));
    *prev = Some(out);
    out
}

/// カットオフ周波数 (Hz) とサンプル間隔 (秒) から平滑化係数を求める
fn alpha(cutoff_hz: f32, dt: f32) -> f32 {
    let tau = 1.0 / (2.0 * PI * cutoff_hz);
    1.0 / (1.0 + tau / dt)
}

/// One Euro Filter for a single joint angle.
///
/// Slow movement is smoothed hard (cutoff near `min_cutoff`), fast movement
/// raises the cutoff by `beta * |velocity|` so real transitions are not lagged.
/// Time steps come from frame timestamps, so replays filter identically.
#[derive(Debug, Clone)]
pub struct OneEuroFilter {
    min_cutoff: f32,
    beta: f32,
    d_cutoff: f32,
    value: Option<f32>,
    /// 平滑化した角速度 (deg/s)
    velocity: Option<f32>,
    /// 直前の (timestamp_ms, 生の値)
    last: Option<(u64, f32)>,
}

impl OneEuroFilter {
    pub fn new(min_cutoff: f32, beta: f32, d_cutoff: f32) -> Self {
        Self {
            min_cutoff,
            beta,
            d_cutoff,
            value: None,
            velocity: None,
            last: None,
        }
    }

    pub fn filter(&mut self, raw: f32, timestamp_ms: u64) -> f32 {
        let Some((last_ms, last_raw)) = self.last else {
            self.last = Some((timestamp_ms, raw));
            self.value = Some(raw);
            return raw;
        };
        let dt = timestamp_ms.saturating_sub(last_ms) as f32 / 1000.0;
        if dt <= 0.0 {
            // 同時刻のサンプルでは状態を進めない
            return self.value.unwrap_or(raw);
        }
        self.last = Some((timestamp_ms, raw));

        let velocity = low_pass(&mut self.velocity, (raw - last_raw) / dt, alpha(self.d_cutoff, dt));
        let cutoff = self.min_cutoff + self.beta * velocity.abs();
        low_pass(&mut self.value, raw, alpha(cutoff, dt))
    }
}
