use log::debug;

/// Attempts made at writing one output message before it is dropped.
pub const MAX_WRITE_ATTEMPTS: u32 = 3;

/// Runs `op` until it succeeds or `max_attempts` calls have failed, and
/// returns the last error. `op` receives the 1-based attempt number.
pub fn with_retries<T, E, F>(max_attempts: u32, mut op: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= max_attempts => return Err(err),
            Err(err) => {
                debug!("attempt {}/{} failed: {}", attempt, max_attempts, err);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_at_first_success() {
        let mut calls = 0;
        let result: Result<u32, String> = with_retries(5, |attempt| {
            calls += 1;
            if attempt < 3 {
                Err(format!("attempt {attempt}"))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result, Ok(3));
        assert_eq!(calls, 3);
    }

    #[test]
    fn gives_up_with_the_last_error() {
        let mut calls = 0;
        let result: Result<(), String> = with_retries(MAX_WRITE_ATTEMPTS, |attempt| {
            calls += 1;
            Err(format!("attempt {attempt}"))
        });
        assert_eq!(result, Err(format!("attempt {MAX_WRITE_ATTEMPTS}")));
        assert_eq!(calls, MAX_WRITE_ATTEMPTS);
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let mut calls = 0;
        let result: Result<(), &str> = with_retries(0, |_| {
            calls += 1;
            Err("no")
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
