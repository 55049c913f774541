//! In-process `WeatherProvider` used by handler and server tests.

use std::{
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::Instant;
use weather_core::{Coordinate, Observation, WeatherError, WeatherProvider};

#[derive(Debug)]
enum Outcome {
    Observation(Observation),
    Status { code: i64, message: &'static str },
    Delay(Duration, Observation),
    Hang,
}

/// Counts calls and answers without any network I/O.
#[derive(Debug)]
pub struct MockProvider {
    outcome: Outcome,
    calls: AtomicUsize,
    abandoned: AtomicUsize,
    last: Mutex<Option<Coordinate>>,
}

/// Counts a call whose future is dropped before it returns.
struct Unfinished<'a>(&'a AtomicUsize);

impl Drop for Unfinished<'_> {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl MockProvider {
    fn with(outcome: Outcome) -> Self {
        Self {
            outcome,
            calls: AtomicUsize::new(0),
            abandoned: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn returning(observation: Observation) -> Self {
        Self::with(Outcome::Observation(observation))
    }

    pub fn failing(code: i64, message: &'static str) -> Self {
        Self::with(Outcome::Status { code, message })
    }

    pub fn delayed(delay: Duration, observation: Observation) -> Self {
        Self::with(Outcome::Delay(delay, observation))
    }

    /// Never answers; only the caller's deadline ends the call.
    pub fn hanging() -> Self {
        Self::with(Outcome::Hang)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls cancelled by the caller before they produced a result.
    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    pub fn last_coordinate(&self) -> Option<Coordinate> {
        *self.last.lock().unwrap()
    }
}

#[async_trait]
impl WeatherProvider for MockProvider {
    async fn get_weather(
        &self,
        _deadline: Instant,
        coordinate: Coordinate,
    ) -> Result<Observation, WeatherError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(coordinate);
        let unfinished = Unfinished(&self.abandoned);

        let result = match &self.outcome {
            Outcome::Observation(observation) => Ok(observation.clone()),
            Outcome::Status { code, message } => Err(WeatherError::UpstreamStatus {
                code: *code,
                message: message.to_string(),
            }),
            Outcome::Delay(delay, observation) => {
                tokio::time::sleep(*delay).await;
                Ok(observation.clone())
            }
            Outcome::Hang => {
                std::future::pending::<()>().await;
                Err(WeatherError::DeadlineExceeded)
            }
        };

        std::mem::forget(unfinished);
        result
    }
}
