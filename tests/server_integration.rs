// Server integration tests: spawn `linepool serve` and talk to it over TCP.
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::thread::sleep;
use std::time::{Duration, Instant};

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

static SERVER_LOCK: Mutex<()> = Mutex::new(());

struct TestServer {
    child: Child,
    addr: SocketAddr,
    _server_guard: MutexGuard<'static, ()>,
}

impl TestServer {
    fn start(extra: &[&str]) -> TestResult<Self> {
        let guard = SERVER_LOCK
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let mut last_err: Option<Box<dyn std::error::Error>> = None;
        for _attempt in 0..3 {
            let port = pick_port()?;
            let addr: SocketAddr = format!("127.0.0.1:{port}").parse()?;

            let mut child = Command::new(env!("CARGO_BIN_EXE_linepool"))
                .arg("serve")
                .arg("--bind")
                .arg(addr.to_string())
                .args(extra)
                .env("RUST_LOG", "warn")
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .spawn()?;
            match wait_for_server(&mut child, addr) {
                Ok(()) => {
                    return Ok(Self {
                        child,
                        addr,
                        _server_guard: guard,
                    });
                }
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| "server failed to start".into()))
    }

    fn send(&self, payload: &[u8]) -> TestResult<Vec<u8>> {
        let mut stream = TcpStream::connect(self.addr)?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        stream.write_all(payload)?;
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply)?;
        Ok(reply)
    }

    fn terminate(&mut self) -> TestResult<ExitStatus> {
        let rc = unsafe { libc::kill(self.child.id() as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        let start = Instant::now();
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            if start.elapsed() > Duration::from_secs(10) {
                return Err("server did not exit after SIGTERM".into());
            }
            sleep(Duration::from_millis(20));
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn pick_port() -> TestResult<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

fn wait_for_server(child: &mut Child, addr: SocketAddr) -> TestResult<()> {
    let start = Instant::now();
    loop {
        // A bare connect-and-close is a session that ends without storing anything.
        if TcpStream::connect_timeout(&addr, Duration::from_millis(200)).is_ok() {
            return Ok(());
        }
        if let Some(status) = child.try_wait()? {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            let detail = stderr.trim();
            return Err(format!(
                "server exited before ready (status: {status}, stderr: {})",
                if detail.is_empty() { "<empty>" } else { detail }
            )
            .into());
        }
        if start.elapsed() > Duration::from_secs(8) {
            return Err("server did not start in time".into());
        }
        sleep(Duration::from_millis(20));
    }
}

fn wait_until_gone(path: &Path) -> bool {
    let start = Instant::now();
    while path.exists() {
        if start.elapsed() > Duration::from_secs(5) {
            return false;
        }
        sleep(Duration::from_millis(20));
    }
    true
}

#[test]
fn single_line_is_echoed() -> TestResult<()> {
    let server = TestServer::start(&["--no-stamp"])?;
    assert_eq!(server.send(b"hello\n")?, b"hello\n");
    Ok(())
}

#[test]
fn replies_accumulate_in_arrival_order() -> TestResult<()> {
    let server = TestServer::start(&["--no-stamp"])?;
    assert_eq!(server.send(b"first\n")?, b"first\n");
    assert_eq!(server.send(b"second\n")?, b"first\nsecond\n");
    assert_eq!(server.send(b"a\nb\n")?, b"first\nsecond\na\nb\n");
    Ok(())
}

#[test]
fn full_ring_keeps_most_recent_records() -> TestResult<()> {
    let server = TestServer::start(&["--no-stamp", "--capacity", "2"])?;
    server.send(b"one\n")?;
    server.send(b"two\n")?;
    assert_eq!(server.send(b"three\n")?, b"two\nthree\n");
    Ok(())
}

#[test]
fn default_capacity_retains_ten_records() -> TestResult<()> {
    let server = TestServer::start(&["--no-stamp"])?;
    let mut expected = Vec::new();
    let mut last = Vec::new();
    for i in 0..12 {
        let line = format!("line-{i}\n");
        if i >= 2 {
            expected.extend_from_slice(line.as_bytes());
        }
        last = server.send(line.as_bytes())?;
    }
    assert_eq!(last, expected);
    Ok(())
}

#[test]
fn unterminated_input_is_dropped_on_disconnect() -> TestResult<()> {
    let server = TestServer::start(&["--no-stamp"])?;
    {
        let mut stream = TcpStream::connect(server.addr)?;
        stream.write_all(b"kept\nlost")?;
        stream.shutdown(std::net::Shutdown::Write)?;
        let mut reply = Vec::new();
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        stream.read_to_end(&mut reply)?;
        assert!(reply.is_empty());
    }
    assert_eq!(server.send(b"next\n")?, b"kept\nnext\n");
    Ok(())
}

#[test]
fn timestamps_are_injected_periodically() -> TestResult<()> {
    let server = TestServer::start(&["--stamp-period", "200ms"])?;
    sleep(Duration::from_millis(700));
    let reply = String::from_utf8(server.send(b"marker\n")?)?;
    let lines: Vec<&str> = reply.lines().collect();
    assert!(lines.contains(&"marker"));
    let stamps: Vec<&&str> = lines
        .iter()
        .filter(|line| line.starts_with("timestamp:"))
        .collect();
    assert!(!stamps.is_empty(), "no timestamps in {reply:?}");
    for stamp in stamps {
        assert_eq!(stamp.len(), "timestamp:YYYY-MM-DD HH:MM:SS".len());
    }
    Ok(())
}

#[test]
fn concurrent_clients_all_get_stored() -> TestResult<()> {
    let server = TestServer::start(&["--no-stamp", "--capacity", "64"])?;
    let addr = server.addr;
    let workers: Vec<_> = (0..16)
        .map(|i| {
            std::thread::spawn(move || -> Result<(String, Vec<u8>), String> {
                let line = format!("worker-{i}\n");
                let mut stream = TcpStream::connect(addr).map_err(|err| err.to_string())?;
                stream
                    .set_read_timeout(Some(Duration::from_secs(5)))
                    .map_err(|err| err.to_string())?;
                stream
                    .write_all(line.as_bytes())
                    .map_err(|err| err.to_string())?;
                let mut reply = Vec::new();
                stream
                    .read_to_end(&mut reply)
                    .map_err(|err| err.to_string())?;
                Ok((line, reply))
            })
        })
        .collect();
    for worker in workers {
        let (line, reply) = worker.join().map_err(|_| "worker panicked")??;
        let reply = String::from_utf8(reply)?;
        assert!(reply.contains(&line), "{line:?} missing from {reply:?}");
    }

    let dump = String::from_utf8(server.send(b"last\n")?)?;
    assert_eq!(dump.lines().count(), 17);
    Ok(())
}

#[test]
fn sigterm_drains_and_removes_data_file() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let data_file = temp.path().join("linepool.data");
    let data_arg = data_file.to_string_lossy().into_owned();
    let mut server = TestServer::start(&["--no-stamp", "--data-file", &data_arg])?;

    server.send(b"alpha\n")?;
    server.send(b"beta\n")?;
    assert_eq!(std::fs::read(&data_file)?, b"alpha\nbeta\n");

    let status = server.terminate()?;
    assert!(status.success(), "exit status: {status}");
    assert!(wait_until_gone(&data_file));
    Ok(())
}

#[test]
fn locked_data_file_is_busy() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let data_file = temp.path().join("linepool.data");
    let data_arg = data_file.to_string_lossy().into_owned();
    let _server = TestServer::start(&["--no-stamp", "--data-file", &data_arg])?;

    let port = pick_port()?;
    let output = Command::new(env!("CARGO_BIN_EXE_linepool"))
        .args(["serve", "--no-stamp", "--bind"])
        .arg(format!("127.0.0.1:{port}"))
        .args(["--data-file", &data_arg])
        .output()?;
    assert_eq!(output.status.code(), Some(4));
    let stderr = String::from_utf8(output.stderr)?;
    let value: serde_json::Value = serde_json::from_str(stderr.trim())?;
    assert_eq!(value["error"]["kind"], "Busy");
    Ok(())
}

#[test]
fn send_command_prints_snapshot() -> TestResult<()> {
    let server = TestServer::start(&["--no-stamp"])?;
    server.send(b"from-socket\n")?;

    let output = Command::new(env!("CARGO_BIN_EXE_linepool"))
        .args(["send", &server.addr.to_string(), "from-cli"])
        .output()?;
    assert!(output.status.success());
    assert_eq!(output.stdout, b"from-socket\nfrom-cli\n");
    Ok(())
}
