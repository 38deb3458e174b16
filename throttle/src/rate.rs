/// Error returned when a value cannot be used as an admission rate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RateError {
    #[error("rate must be a finite number, got {0}")]
    NotFinite(f64),
    #[error("rate must not be negative, got {0}")]
    Negative(f64),
    #[error("cannot parse {0:?} as a rate")]
    Parse(String),
}

/// Admission rate in items per second. Zero means paused.
///
/// Always finite and non-negative: validation happens in [`Rate::new`] so the gate never has
/// to deal with an unusable value.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Rate(f64);

impl Rate {
    pub const PAUSED: Rate = Rate(0.0);

    pub fn new(per_second: f64) -> Result<Self, RateError> {
        if !per_second.is_finite() {
            return Err(RateError::NotFinite(per_second));
        }
        if per_second < 0.0 {
            return Err(RateError::Negative(per_second));
        }
        // normalize -0.0 so that equality checks behave
        Ok(Self(per_second.abs()))
    }

    pub fn per_second(&self) -> f64 {
        self.0
    }

    pub fn is_paused(&self) -> bool {
        self.0 == 0.0
    }

    /// Time between permits: `ceil(1000 / rate)` milliseconds, `None` while paused.
    pub fn period(&self) -> Option<std::time::Duration> {
        if self.is_paused() {
            return None;
        }
        // float to int casts saturate, so tiny rates end up with u64::MAX millis
        let millis = (1000.0 / self.0).ceil() as u64;
        Some(std::time::Duration::from_millis(millis))
    }
}

impl std::str::FromStr for Rate {
    type Err = RateError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .trim()
            .parse::<f64>()
            .map_err(|_| RateError::Parse(s.to_string()))?;
        Rate::new(value)
    }
}

impl std::fmt::Display for Rate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/s", self.0)
    }
}
