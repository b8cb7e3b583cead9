use super::MediaError;

/// Result of running a [`Fallback`] chain.
#[derive(Debug)]
pub enum Outcome<T> {
    /// The first attempt succeeded.
    Primary(T),
    /// A later attempt succeeded after earlier ones failed.
    Degraded { value: T, via: &'static str },
    /// Every attempt failed; errors in attempt order.
    Failed(Vec<(&'static str, MediaError)>),
}

impl<T> Outcome<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Primary(value) | Self::Degraded { value, .. } => Some(value),
            Self::Failed(_) => None,
        }
    }

    /// The value, or the last attempt's error.
    pub fn into_result(self) -> Result<T, MediaError> {
        match self {
            Self::Primary(value) | Self::Degraded { value, .. } => Ok(value),
            Self::Failed(mut errors) => Err(errors
                .pop()
                .map(|(_, e)| e)
                .unwrap_or(MediaError::NotConfigured("any"))),
        }
    }
}

type Attempt<'a, T> = Box<dyn FnOnce() -> Result<T, MediaError> + 'a>;

/// Ordered list of ways to produce a value, tried lazily until one works.
pub struct Fallback<'a, T> {
    attempts: Vec<(&'static str, Attempt<'a, T>)>,
}

impl<'a, T> Fallback<'a, T> {
    pub fn new() -> Self {
        Self {
            attempts: Vec::new(),
        }
    }

    pub fn then(
        mut self,
        label: &'static str,
        attempt: impl FnOnce() -> Result<T, MediaError> + 'a,
    ) -> Self {
        self.attempts.push((label, Box::new(attempt)));
        self
    }

    pub fn run(self) -> Outcome<T> {
        let mut errors = Vec::new();
        for (i, (label, attempt)) in self.attempts.into_iter().enumerate() {
            match attempt() {
                Ok(value) if i == 0 => return Outcome::Primary(value),
                Ok(value) => return Outcome::Degraded { value, via: label },
                Err(e) => {
                    log::info!("  >>> {label} failed: {e}");
                    errors.push((label, e));
                }
            }
        }
        Outcome::Failed(errors)
    }
}

impl<T> Default for Fallback<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_primary_skips_secondary() {
        let secondary_ran = Cell::new(false);
        let outcome = Fallback::new()
            .then("eu", || Ok(1))
            .then("us", || {
                secondary_ran.set(true);
                Ok(2)
            })
            .run();
        assert!(matches!(outcome, Outcome::Primary(1)));
        assert!(!secondary_ran.get());
    }

    #[test]
    fn test_degraded() {
        let outcome = Fallback::new()
            .then("eu", || Err(MediaError::NotConfigured("audio")))
            .then("us", || Ok(2))
            .run();
        assert!(matches!(outcome, Outcome::Degraded { value: 2, via: "us" }));
    }

    #[test]
    fn test_all_failed_reports_last_error() {
        let outcome: Outcome<()> = Fallback::new()
            .then("eu", || Err(MediaError::NotConfigured("audio")))
            .then("us", || Err(MediaError::MissingArchive("pak_iop0.pak".to_string())))
            .run();
        let Outcome::Failed(errors) = &outcome else {
            panic!("expected failure");
        };
        assert_eq!(errors.len(), 2);
        assert!(matches!(outcome.into_result(), Err(MediaError::MissingArchive(_))));
    }
}
