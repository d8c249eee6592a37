use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use super::CommError;

/// Wire messages between a peer and the hub, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Frame {
    Hello { rank: usize },
    AllReduce { values: Vec<f64> },
    Broadcast { root: usize, values: Option<Vec<f64>> },
    Reply { values: Vec<f64> },
}

pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), CommError>
where
    W: AsyncWrite + Unpin,
{
    let mut bytes = serde_json::to_vec(frame)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame; `peer` only labels the error when the stream ends.
pub async fn read_frame<R>(reader: &mut R, peer: usize) -> Result<Frame, CommError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(CommError::Disconnected { rank: peer });
    }
    Ok(serde_json::from_str(line.trim_end())?)
}
