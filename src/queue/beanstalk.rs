//! beanstalkd 文本协议客户端

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tracing::debug;

use super::{JobQueue, PutOptions, QueueConnector, QueueError, ReservedJob, TubeStats};
use crate::config::BeanstalkConfig;

/// 单条响应行的最大长度
const MAX_LINE_LENGTH: usize = 224;

/// beanstalkd 连接，流类型泛化以便测试使用内存管道
pub struct BeanstalkConnection<S> {
    stream: BufStream<S>,
    /// 单条命令（不含 reserve 的等待时间）的超时
    io_timeout: Duration,
    watching: Vec<String>,
}

impl<S> BeanstalkConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, io_timeout: Duration) -> Self {
        Self {
            stream: BufStream::new(stream),
            io_timeout,
            watching: vec!["default".to_string()],
        }
    }

    async fn write_command(&mut self, command: &str, body: Option<&[u8]>) -> Result<(), QueueError> {
        self.stream.write_all(command.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        if let Some(body) = body {
            self.stream.write_all(body).await?;
            self.stream.write_all(b"\r\n").await?;
        }
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, QueueError> {
        let mut line = Vec::with_capacity(64);
        let n = (&mut self.stream)
            .take(MAX_LINE_LENGTH as u64)
            .read_until(b'\n', &mut line)
            .await?;
        if n == 0 {
            return Err(QueueError::Closed);
        }
        if !line.ends_with(b"\r\n") {
            return Err(QueueError::Protocol(
                String::from_utf8_lossy(&line).into_owned(),
            ));
        }
        line.truncate(line.len() - 2);
        String::from_utf8(line).map_err(|e| QueueError::Protocol(e.to_string()))
    }

    async fn read_body(&mut self, len: usize) -> Result<Vec<u8>, QueueError> {
        let mut body = vec![0u8; len + 2];
        self.stream.read_exact(&mut body).await?;
        if !body.ends_with(b"\r\n") {
            return Err(QueueError::Protocol("job body not terminated by CRLF".into()));
        }
        body.truncate(len);
        Ok(body)
    }

    /// 发送命令并读取响应行
    async fn round_trip(&mut self, command: &str, body: Option<&[u8]>) -> Result<String, QueueError> {
        self.write_command(command, body).await?;
        let line = self.read_line().await?;
        debug!(command = %command, response = %line, "beanstalk round trip");
        Ok(line)
    }

    /// 带超时的单条命令
    async fn command(&mut self, command: &str, body: Option<&[u8]>) -> Result<String, QueueError> {
        let timeout = self.io_timeout;
        tokio::time::timeout(timeout, self.round_trip(command, body))
            .await
            .map_err(|_| QueueError::Timeout)?
    }

    async fn simple(&mut self, command: String, expected: &str, id: u64) -> Result<(), QueueError> {
        let line = self.command(&command, None).await?;
        match line.as_str() {
            l if l == expected => Ok(()),
            "NOT_FOUND" => Err(QueueError::NotFound(id)),
            "BURIED" => Err(QueueError::Buried(id)),
            other => Err(server_or_protocol(other)),
        }
    }

    async fn ignore(&mut self, tube: &str) -> Result<(), QueueError> {
        let command = format!("ignore {tube}");
        let line = self.command(&command, None).await?;
        if line.starts_with("WATCHING ") {
            self.watching.retain(|t| t != tube);
            Ok(())
        } else {
            Err(server_or_protocol(&line))
        }
    }
}

fn server_or_protocol(line: &str) -> QueueError {
    match line {
        "OUT_OF_MEMORY" | "INTERNAL_ERROR" | "BAD_FORMAT" | "UNKNOWN_COMMAND"
        | "EXPECTED_CRLF" | "JOB_TOO_BIG" | "DRAINING" | "NOT_IGNORED" => {
            QueueError::Server(line.to_string())
        }
        other => QueueError::Protocol(other.to_string()),
    }
}

fn parse_id(rest: &str) -> Result<u64, QueueError> {
    rest.trim()
        .parse::<u64>()
        .map_err(|_| QueueError::Protocol(format!("bad job id: {rest}")))
}

#[async_trait]
impl<S> JobQueue for BeanstalkConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn use_tube(&mut self, tube: &str) -> Result<(), QueueError> {
        let command = format!("use {tube}");
        let line = self.command(&command, None).await?;
        if line == format!("USING {tube}") {
            Ok(())
        } else {
            Err(server_or_protocol(&line))
        }
    }

    async fn watch_only(&mut self, tube: &str) -> Result<(), QueueError> {
        let command = format!("watch {tube}");
        let line = self.command(&command, None).await?;
        if !line.starts_with("WATCHING ") {
            return Err(server_or_protocol(&line));
        }
        if !self.watching.iter().any(|t| t == tube) {
            self.watching.push(tube.to_string());
        }

        let others: Vec<String> = self
            .watching
            .iter()
            .filter(|t| t.as_str() != tube)
            .cloned()
            .collect();
        for other in others {
            self.ignore(&other).await?;
        }
        Ok(())
    }

    async fn put(&mut self, body: &[u8], options: PutOptions) -> Result<u64, QueueError> {
        let command = format!(
            "put {} {} {} {}",
            options.priority,
            options.delay.as_secs(),
            options.ttr.as_secs().max(1),
            body.len()
        );
        let line = self.command(&command, Some(body)).await?;
        if let Some(rest) = line.strip_prefix("INSERTED ") {
            return parse_id(rest);
        }
        if let Some(rest) = line.strip_prefix("BURIED ") {
            return Err(QueueError::Buried(parse_id(rest)?));
        }
        Err(server_or_protocol(&line))
    }

    async fn reserve(&mut self, timeout: Duration) -> Result<Option<ReservedJob>, QueueError> {
        let command = format!("reserve-with-timeout {}", timeout.as_secs());
        let io_timeout = self.io_timeout;
        let fut = async {
            let line = self.round_trip(&command, None).await?;
            if line == "TIMED_OUT" || line == "DEADLINE_SOON" {
                return Ok(None);
            }
            let Some(rest) = line.strip_prefix("RESERVED ") else {
                return Err(server_or_protocol(&line));
            };
            let mut parts = rest.split_whitespace();
            let id = parse_id(parts.next().unwrap_or_default())?;
            let len = parts
                .next()
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| QueueError::Protocol(format!("bad RESERVED line: {line}")))?;
            let body = self.read_body(len).await?;
            Ok(Some(ReservedJob { id, body }))
        };
        tokio::time::timeout(io_timeout + timeout, fut)
            .await
            .map_err(|_| QueueError::Timeout)?
    }

    async fn ack(&mut self, id: u64) -> Result<(), QueueError> {
        self.simple(format!("delete {id}"), "DELETED", id).await
    }

    async fn release(
        &mut self,
        id: u64,
        priority: u32,
        delay: Duration,
    ) -> Result<(), QueueError> {
        self.simple(
            format!("release {id} {priority} {}", delay.as_secs()),
            "RELEASED",
            id,
        )
        .await
    }

    async fn bury(&mut self, id: u64, priority: u32) -> Result<(), QueueError> {
        self.simple(format!("bury {id} {priority}"), "BURIED", id)
            .await
    }

    async fn stats_tube(&mut self, tube: &str) -> Result<TubeStats, QueueError> {
        let command = format!("stats-tube {tube}");
        let io_timeout = self.io_timeout;
        let fut = async {
            let line = self.round_trip(&command, None).await?;
            if line == "NOT_FOUND" {
                // 从未使用过的 tube 视为空
                return Ok(TubeStats {
                    name: tube.to_string(),
                    ..Default::default()
                });
            }
            let Some(rest) = line.strip_prefix("OK ") else {
                return Err(server_or_protocol(&line));
            };
            let len = rest
                .trim()
                .parse::<usize>()
                .map_err(|_| QueueError::Protocol(format!("bad OK line: {line}")))?;
            let body = self.read_body(len).await?;
            TubeStats::parse(&String::from_utf8_lossy(&body))
        };
        tokio::time::timeout(io_timeout, fut)
            .await
            .map_err(|_| QueueError::Timeout)?
    }
}

/// TCP beanstalkd 连接工厂
#[derive(Debug, Clone)]
pub struct BeanstalkConnector {
    address: String,
    connect_timeout: Duration,
}

impl BeanstalkConnector {
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
        }
    }

    pub fn from_config(config: &BeanstalkConfig) -> Self {
        Self::new(
            config.address(),
            Duration::from_secs(config.connect_timeout_secs),
        )
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl QueueConnector for BeanstalkConnector {
    async fn connect(&self) -> Result<Box<dyn JobQueue>, QueueError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| QueueError::Timeout)??;
        stream.set_nodelay(true)?;
        debug!(address = %self.address, "connected to beanstalkd");
        Ok(Box::new(BeanstalkConnection::new(
            stream,
            self.connect_timeout,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, duplex};

    /// 按脚本应答的假 beanstalkd：每读到一行命令回一条预设响应
    fn scripted_server(
        server: DuplexStream,
        responses: Vec<&'static [u8]>,
    ) -> tokio::task::JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server);
            let mut reader = BufReader::new(read);
            let mut received = Vec::new();
            for response in responses {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap() == 0 {
                    break;
                }
                let line = line.trim_end().to_string();
                if line.starts_with("put ") {
                    let mut body = String::new();
                    reader.read_line(&mut body).await.unwrap();
                    received.push(format!("{line}|{}", body.trim_end()));
                } else {
                    received.push(line);
                }
                write.write_all(response).await.unwrap();
            }
            received
        })
    }

    #[tokio::test]
    async fn test_put_and_reserve() {
        let (client, server) = duplex(4096);
        let handle = scripted_server(
            server,
            vec![
                b"USING push.demo\r\n",
                b"INSERTED 7\r\n",
                b"RESERVED 7 5\r\nhello\r\n",
                b"DELETED\r\n",
            ],
        );

        let mut conn = BeanstalkConnection::new(client, Duration::from_secs(1));
        conn.use_tube("push.demo").await.unwrap();
        let id = conn
            .put(
                b"hello",
                PutOptions {
                    priority: 10,
                    delay: Duration::from_secs(3),
                    ttr: Duration::from_secs(60),
                },
            )
            .await
            .unwrap();
        assert_eq!(id, 7);
        let job = conn.reserve(Duration::from_secs(2)).await.unwrap().unwrap();
        assert_eq!(job, ReservedJob { id: 7, body: b"hello".to_vec() });
        conn.ack(7).await.unwrap();

        let received = handle.await.unwrap();
        assert_eq!(
            received,
            vec![
                "use push.demo".to_string(),
                "put 10 3 60 5|hello".to_string(),
                "reserve-with-timeout 2".to_string(),
                "delete 7".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_reserve_timeout_and_deadline_soon() {
        let (client, server) = duplex(4096);
        let _handle = scripted_server(server, vec![b"TIMED_OUT\r\n", b"DEADLINE_SOON\r\n"]);
        let mut conn = BeanstalkConnection::new(client, Duration::from_secs(1));
        assert!(conn.reserve(Duration::from_secs(1)).await.unwrap().is_none());
        assert!(conn.reserve(Duration::from_secs(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_watch_only_ignores_default() {
        let (client, server) = duplex(4096);
        let handle = scripted_server(server, vec![b"WATCHING 2\r\n", b"WATCHING 1\r\n"]);
        let mut conn = BeanstalkConnection::new(client, Duration::from_secs(1));
        conn.watch_only("push.demo").await.unwrap();
        let received = handle.await.unwrap();
        assert_eq!(received, vec!["watch push.demo", "ignore default"]);
    }

    #[tokio::test]
    async fn test_not_found_and_buried_responses() {
        let (client, server) = duplex(4096);
        let _handle = scripted_server(
            server,
            vec![b"NOT_FOUND\r\n", b"BURIED\r\n", b"BURIED 9\r\n"],
        );
        let mut conn = BeanstalkConnection::new(client, Duration::from_secs(1));
        assert!(matches!(conn.ack(3).await, Err(QueueError::NotFound(3))));
        assert!(matches!(
            conn.release(4, 0, Duration::ZERO).await,
            Err(QueueError::Buried(4))
        ));
        assert!(matches!(
            conn.put(b"x", PutOptions::default()).await,
            Err(QueueError::Buried(9))
        ));
    }

    #[tokio::test]
    async fn test_stats_tube() {
        let (client, server) = duplex(4096);
        let body = "---\nname: batch_push\ncurrent-jobs-ready: 12\n";
        let response: &'static [u8] = Box::leak(
            format!("OK {}\r\n{}\r\n", body.len(), body)
                .into_bytes()
                .into_boxed_slice(),
        );
        let _handle = scripted_server(server, vec![response, b"NOT_FOUND\r\n"]);
        let mut conn = BeanstalkConnection::new(client, Duration::from_secs(1));
        let stats = conn.stats_tube("batch_push").await.unwrap();
        assert_eq!(stats.name, "batch_push");
        assert_eq!(stats.current_jobs_ready, 12);

        let empty = conn.stats_tube("push.unused").await.unwrap();
        assert_eq!(empty.name, "push.unused");
        assert_eq!(empty.current_jobs_ready, 0);
    }

    #[tokio::test]
    async fn test_closed_connection() {
        let (client, server) = duplex(64);
        drop(server);
        let mut conn = BeanstalkConnection::new(client, Duration::from_secs(1));
        assert!(conn.reserve(Duration::from_secs(1)).await.is_err());
    }
}
