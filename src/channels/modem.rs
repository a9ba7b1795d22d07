//! Modem bridge — line-delimited JSON to and from an external modem driver.
//!
//! The driver process owns the serial port and the AT/PDU protocol. It
//! writes one `InboundSms` JSON object per line and reads one
//! `{"to": ..., "text": ...}` object per line for each SMS to send.

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::sms::SmsTransport;
use crate::error::ForwardError;
use crate::forward::Channel;
use crate::pipeline::types::InboundSms;

#[derive(Debug, Serialize)]
struct OutboundLine<'a> {
    to: &'a str,
    text: &'a str,
}

/// Writes outbound SMS requests for the driver.
pub struct LineModemBridge<W> {
    writer: Mutex<W>,
}

impl<W> LineModemBridge<W>
where
    W: AsyncWrite + Send + Unpin,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl LineModemBridge<tokio::io::Stdout> {
    /// Bridge writing to this process's stdout.
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

#[async_trait]
impl<W> SmsTransport for LineModemBridge<W>
where
    W: AsyncWrite + Send + Unpin,
{
    async fn send_sms(&self, recipient: &str, text: &str) -> Result<(), ForwardError> {
        let mut line = serde_json::to_string(&OutboundLine { to: recipient, text })
            .map_err(|e| modem_error(recipient, e.to_string()))?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| modem_error(recipient, e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| modem_error(recipient, e.to_string()))?;
        Ok(())
    }
}

fn modem_error(recipient: &str, reason: String) -> ForwardError {
    ForwardError::SendFailed {
        channel: Channel::Sms.to_string(),
        destination: recipient.to_string(),
        reason,
    }
}

/// Read inbound events from the driver until EOF.
///
/// Malformed lines are logged and skipped. The task ends at EOF or when
/// the engine stops accepting messages.
pub fn spawn_inbound_reader<R>(reader: R, tx: mpsc::Sender<InboundSms>) -> JoinHandle<()>
where
    R: AsyncBufRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = reader.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<InboundSms>(line) {
                        Ok(sms) => {
                            debug!(originator = %sms.originator, "Inbound SMS from modem");
                            if tx.send(sms).await.is_err() {
                                info!("Inbound queue closed, modem reader stopping");
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "Skipping malformed modem line"),
                    }
                }
                Ok(None) => {
                    info!("Modem driver closed its output");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Error reading from modem driver");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, BufReader};

    use super::*;

    #[tokio::test]
    async fn outbound_sms_written_as_json_lines() {
        let (client, mut server) = tokio::io::duplex(1024);
        let bridge = LineModemBridge::new(client);

        bridge.send_sms("+1555", "hi\nthere").await.unwrap();
        drop(bridge);

        let mut out = String::new();
        server.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "{\"to\":\"+1555\",\"text\":\"hi\\nthere\"}\n");
    }

    #[tokio::test]
    async fn inbound_lines_parsed_and_bad_lines_skipped() {
        let input = concat!(
            "{\"originator\":\"+1\",\"timestamp\":\"2024-01-01T00:00:00Z\",\"text\":\"a\"}\n",
            "garbage\n",
            "\n",
            "{\"originator\":\"+2\",\"timestamp\":\"2024-01-01T00:00:00Z\",\"text\":\"b\"}\n",
        );
        let (tx, mut rx) = mpsc::channel(8);
        let handle = spawn_inbound_reader(BufReader::new(input.as_bytes()), tx);
        handle.await.unwrap();

        assert_eq!(rx.recv().await.unwrap().originator, "+1");
        assert_eq!(rx.recv().await.unwrap().originator, "+2");
        assert!(rx.recv().await.is_none());
    }
}
