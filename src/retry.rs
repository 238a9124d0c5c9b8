//! Повтор операции с экспоненциальной задержкой

use std::fmt::Display;
use std::thread;
use std::time::Duration;

use tracing::{error, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Задержка после неудачной попытки `attempt` (нумерация с 1)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(self.base_delay.as_secs_f64() * factor)
    }

    /// Выполняет операцию до `max_attempts` раз; последняя ошибка возвращается вызывающему
    pub fn run<T, E, F>(&self, task: &str, mut operation: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match operation() {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= max_attempts => {
                    error!(task, attempts = attempt, "all retries failed: {}", err);
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        task,
                        "attempt {}/{} failed: {}, retrying in {:?}",
                        attempt,
                        max_attempts,
                        err,
                        delay
                    );
                    thread::sleep(delay);
                }
            }
        }
    }
}
