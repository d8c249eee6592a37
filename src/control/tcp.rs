use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::codec::{Frame, read_frame, write_frame};
use super::{CommError, Communicator};

const CONNECT_ATTEMPTS: usize = 300;
const CONNECT_BACKOFF: Duration = Duration::from_millis(100);

struct Link {
    /// Rank on the other end of the connection.
    rank: usize,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Link {
    fn new(rank: usize, stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            rank,
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send(&mut self, frame: &Frame) -> Result<(), CommError> {
        write_frame(&mut self.writer, frame).await
    }

    async fn recv(&mut self) -> Result<Frame, CommError> {
        read_frame(&mut self.reader, self.rank).await
    }
}

/// Star-topology communicator over TCP.
///
/// Rank 0 is the hub: peers send their contribution to it, the hub combines
/// them and replies to everyone. One link per peer on the hub, a single link
/// to the hub on every peer.
pub struct TcpComm {
    rank: usize,
    size: usize,
    links: Mutex<Vec<Link>>,
}

impl TcpComm {
    /// Binds `addr` and waits until every other rank has joined.
    pub async fn bind_hub<A: ToSocketAddrs>(addr: A, size: usize) -> Result<Self, CommError> {
        let listener = TcpListener::bind(addr).await?;
        Self::hub(listener, size).await
    }

    pub async fn hub(listener: TcpListener, size: usize) -> Result<Self, CommError> {
        info!(addr = %listener.local_addr()?, size, "waiting for workers");
        let mut links: Vec<Link> = Vec::with_capacity(size.saturating_sub(1));
        while links.len() + 1 < size {
            let (stream, peer_addr) = listener.accept().await?;
            stream.set_nodelay(true)?;
            let mut link = Link::new(usize::MAX, stream);
            let rank = match link.recv().await? {
                Frame::Hello { rank } => rank,
                other => {
                    return Err(CommError::Protocol(format!(
                        "expected hello from {peer_addr}, got {other:?}"
                    )));
                }
            };
            if rank == 0 || rank >= size || links.iter().any(|l| l.rank == rank) {
                return Err(CommError::Protocol(format!(
                    "unexpected rank {rank} in a group of size {size}"
                )));
            }
            debug!(rank, %peer_addr, "worker joined");
            link.rank = rank;
            links.push(link);
        }
        links.sort_by_key(|l| l.rank);

        Ok(Self {
            rank: 0,
            size,
            links: Mutex::new(links),
        })
    }

    /// Connects to the hub, retrying while it is not listening yet.
    pub async fn connect<A>(addr: A, rank: usize, size: usize) -> Result<Self, CommError>
    where
        A: ToSocketAddrs + Clone,
    {
        if rank == 0 || rank >= size {
            return Err(CommError::Protocol(format!(
                "rank {rank} cannot join a group of size {size} as a peer"
            )));
        }

        let mut attempt = 0;
        let stream = loop {
            match TcpStream::connect(addr.clone()).await {
                Ok(stream) => break stream,
                Err(e) if attempt + 1 < CONNECT_ATTEMPTS => {
                    attempt += 1;
                    debug!(rank, attempt, error = %e, "hub not reachable yet");
                    tokio::time::sleep(CONNECT_BACKOFF).await;
                }
                Err(e) => return Err(e.into()),
            }
        };
        stream.set_nodelay(true)?;

        let mut link = Link::new(0, stream);
        link.send(&Frame::Hello { rank }).await?;

        Ok(Self {
            rank,
            size,
            links: Mutex::new(vec![link]),
        })
    }

    async fn gather(links: &mut [Link]) -> Result<Vec<Frame>, CommError> {
        try_join_all(links.iter_mut().map(|link| link.recv())).await
    }

    async fn scatter(links: &mut [Link], values: &[f64]) -> Result<(), CommError> {
        let reply = Frame::Reply {
            values: values.to_vec(),
        };
        try_join_all(links.iter_mut().map(|link| link.send(&reply))).await?;
        Ok(())
    }

    async fn await_reply(link: &mut Link) -> Result<Vec<f64>, CommError> {
        match link.recv().await? {
            Frame::Reply { values } => Ok(values),
            other => Err(CommError::Protocol(format!("expected reply, got {other:?}"))),
        }
    }
}

#[async_trait]
impl Communicator for TcpComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    async fn allreduce_sum(&self, values: &[f64]) -> Result<Vec<f64>, CommError> {
        let mut links = self.links.lock().await;

        if self.rank != 0 {
            let link = &mut links[0];
            link.send(&Frame::AllReduce {
                values: values.to_vec(),
            })
            .await?;
            return Self::await_reply(link).await;
        }

        let frames = Self::gather(&mut links).await?;
        let mut total = values.to_vec();
        for (link, frame) in links.iter().zip(frames) {
            let theirs = match frame {
                Frame::AllReduce { values } => values,
                other => {
                    return Err(CommError::Protocol(format!(
                        "rank {} is out of step: expected allreduce, got {other:?}",
                        link.rank
                    )));
                }
            };
            if theirs.len() != total.len() {
                return Err(CommError::LengthMismatch {
                    rank: link.rank,
                    expected: total.len(),
                    got: theirs.len(),
                });
            }
            for (t, v) in total.iter_mut().zip(theirs) {
                *t += v;
            }
        }
        Self::scatter(&mut links, &total).await?;
        Ok(total)
    }

    async fn broadcast(&self, values: &[f64], root: usize) -> Result<Vec<f64>, CommError> {
        if root >= self.size {
            return Err(CommError::Protocol(format!(
                "broadcast root {root} outside a group of size {}",
                self.size
            )));
        }
        let mut links = self.links.lock().await;

        if self.rank != 0 {
            let link = &mut links[0];
            link.send(&Frame::Broadcast {
                root,
                values: (self.rank == root).then(|| values.to_vec()),
            })
            .await?;
            return Self::await_reply(link).await;
        }

        let frames = Self::gather(&mut links).await?;
        let mut payload = (root == 0).then(|| values.to_vec());
        for (link, frame) in links.iter().zip(frames) {
            match frame {
                Frame::Broadcast {
                    root: their_root,
                    values,
                } if their_root == root => {
                    if link.rank == root {
                        payload = values;
                    }
                }
                other => {
                    return Err(CommError::Protocol(format!(
                        "rank {} is out of step: expected broadcast from {root}, got {other:?}",
                        link.rank
                    )));
                }
            }
        }
        let payload = payload.ok_or_else(|| {
            CommError::Protocol(format!("root {root} did not provide broadcast values"))
        })?;
        Self::scatter(&mut links, &payload).await?;
        Ok(payload)
    }
}
