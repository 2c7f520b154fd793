//! Commands typed on the standard input, one name per line.

use crate::command::{CommandSource, ControlCommand};
use crate::router::CommandSink;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct ConsoleListener;

impl ConsoleListener {
    /// Reads stdin until end of file or shutdown.
    pub async fn run<S: CommandSink>(self, sink: S, shutdown: CancellationToken) {
        self.run_with(BufReader::new(tokio::io::stdin()), sink, shutdown)
            .await
    }

    pub async fn run_with<R, S>(self, reader: R, sink: S, shutdown: CancellationToken)
    where
        R: AsyncBufRead + Unpin,
        S: CommandSink,
    {
        let mut lines = reader.lines();
        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => return,
                line = lines.next_line() => line,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!("Console closed");
                    return;
                }
                Err(e) => {
                    warn!("Console read failed: {}", e);
                    return;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<ControlCommand>() {
                Ok(command) => {
                    if let Err(e) = sink.dispatch(command, CommandSource::Console) {
                        warn!(command = %command, "Console command dropped: {}", e);
                    }
                }
                Err(e) => warn!("{}", e),
            }
        }
    }
}
