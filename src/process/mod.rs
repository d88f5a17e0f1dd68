//! Startup failures and process exit codes.

use std::future::Future;
use std::process::ExitCode;

use crate::bus::BusError;
use crate::config::ConfigError;
use crate::storage::StoreError;

/// A failure that stops a service before or while serving.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Broker error: {0}")]
    Broker(#[from] BusError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("HTTP server error: {0}")]
    Serve(#[from] std::io::Error),
}

impl StartupError {
    /// Distinct exit status per failure class.
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    fn code(&self) -> u8 {
        match self {
            StartupError::Config(_) => 1,
            StartupError::Broker(_) => 2,
            StartupError::Store(_) => 3,
            StartupError::Serve(_) => 4,
        }
    }
}

/// Log a startup result and turn it into the process exit status.
pub fn exit_with(result: Result<(), StartupError>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Service failed");
            e.exit_code()
        }
    }
}

/// Run `work` to completion, then `close`, whatever `work` returned.
///
/// `close` is not polled until `work` has finished, so it can borrow the
/// same handle `work` is using.
pub async fn close_after<T, E>(
    work: impl Future<Output = Result<T, E>>,
    close: impl Future<Output = ()>,
) -> Result<T, E> {
    let result = work.await;
    close.await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Broker, ChannelBroker, Exchange};

    #[test]
    fn test_exit_codes_are_distinct() {
        let codes = [
            StartupError::from(ConfigError::Missing("PORT")).code(),
            StartupError::from(BusError::Connection("refused".into())).code(),
            StartupError::from(StoreError::Unavailable("down".into())).code(),
            StartupError::from(std::io::Error::from(std::io::ErrorKind::AddrInUse)).code(),
        ];
        assert_eq!(codes, [1, 2, 3, 4]);
    }

    #[test]
    fn test_config_message_names_variable() {
        let err = StartupError::from(ConfigError::Missing("RABBIT"));
        assert_eq!(
            err.to_string(),
            "Please specify the RABBIT environment variable"
        );
    }

    #[tokio::test]
    async fn test_close_after_closes_on_failure() {
        let broker = ChannelBroker::new();

        let result = close_after(
            async {
                broker.declare_exchange(&Exchange::fanout("Viewed")).await?;
                Err::<(), _>(StartupError::from(BusError::Topology("conflict".into())))
            },
            broker.close(),
        )
        .await;

        assert_eq!(result.unwrap_err().code(), 2);
        assert!(broker
            .declare_exchange(&Exchange::fanout("Viewed"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_close_after_closes_on_success() {
        let broker = ChannelBroker::new();

        let value = close_after(async { Ok::<_, StartupError>(7) }, broker.close())
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert!(broker
            .declare_exchange(&Exchange::fanout("Viewed"))
            .await
            .is_err());
    }
}
