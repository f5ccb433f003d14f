use super::GuideAlgorithm;

/// Passthrough: the raw error is the command, unmodified. Has no history to
/// reset, so it's mostly useful as a baseline for comparing the other
/// filters or when an axis is deliberately left unfiltered.
#[derive(Default)]
pub struct Identity;

impl Identity {
    pub fn new() -> Self {
        Self
    }
}

impl GuideAlgorithm for Identity {
    fn result(&mut self, raw_error: f64) -> f64 {
        raw_error
    }

    fn reset(&mut self) {}

    fn summary(&self) -> String {
        "Identity".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_through_unmodified() {
        let mut a = Identity::new();
        assert_eq!(a.result(3.2), 3.2);
        assert_eq!(a.result(-1.5), -1.5);
    }
}
