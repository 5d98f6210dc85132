//! Live-socket end-to-end tests: a real server, real clients, real time.
//!
//! Slices are kept short and read timeouts generous so the tests stay
//! robust on slow machines.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::Duration;

use toolshare::config::SchedulerConfig;
use toolshare::Server;

fn quick_config() -> SchedulerConfig {
    SchedulerConfig::new()
        .with_tool_count(1)
        .with_min_slice_ms(50)
        .with_max_slice_ms(500)
        .with_tick_interval_ms(5)
        .with_idle_wait_ms(100)
}

fn read_line_from<R: BufRead>(reader: &mut R) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read notification line");
    line
}

#[test]
fn test_tcp_request_report_quit() {
    let server = Server::bind("127.0.0.1:0", quick_config()).unwrap();
    let addr = server.local_tcp_addr().unwrap();
    let shared = server.shared();
    let server_thread = thread::spawn(move || server.run().unwrap());

    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);

    writer.write_all(b"REQUEST 100\r\n").unwrap();
    let assigned = read_line_from(&mut reader);
    assert_eq!(
        assigned,
        "Customer 1 with share 0 is assigned to the tool 0.\n"
    );

    let left = read_line_from(&mut reader);
    assert!(left.starts_with("Customer 1 with share 1"));
    assert!(left.ends_with("leaves the tool 0.\n"));

    // Unknown verbs and malformed requests are silently ignored.
    writer.write_all(b"FROBNICATE\nREQUEST -5\nREQUEST x\n").unwrap();

    writer.write_all(b"REPORT\n").unwrap();
    let header = read_line_from(&mut reader);
    assert!(header.starts_with("k: 1, customers: 0 waiting, 1 resting, 1 in total"));
    let average = read_line_from(&mut reader);
    assert!(average.starts_with("average share: 1"));

    writer.write_all(b"QUIT\n").unwrap();
    // The server tears the connection down; the stream drains to EOF.
    let mut rest = Vec::new();
    let _ = reader.read_to_end(&mut rest);

    shared.trigger_shutdown();
    server_thread.join().unwrap();
}

#[test]
fn test_unix_socket_lifecycle_and_unlink() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("toolshare.sock");
    let conn = format!("@{}", path.display());

    let server = Server::bind(&conn, quick_config()).unwrap();
    assert!(path.exists());
    let shared = server.shared();
    let server_thread = thread::spawn(move || server.run().unwrap());

    let stream = UnixStream::connect(&path).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);

    writer.write_all(b"REQUEST 80\n").unwrap();
    let assigned = read_line_from(&mut reader);
    assert!(assigned.contains("is assigned to the tool 0."));
    let left = read_line_from(&mut reader);
    assert!(left.contains("leaves the tool 0."));

    drop(writer);
    drop(reader);

    shared.trigger_shutdown();
    server_thread.join().unwrap();
    // Graceful exit unlinks the socket file.
    assert!(!path.exists());
}

#[test]
fn test_preempted_waiter_gets_notified() {
    let server = Server::bind("127.0.0.1:0", quick_config()).unwrap();
    let addr = server.local_tcp_addr().unwrap();
    let shared = server.shared();
    let server_thread = thread::spawn(move || server.run().unwrap());

    // First client grabs the only tool for a long time.
    let hog = TcpStream::connect(addr).unwrap();
    hog.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut hog_writer = hog.try_clone().unwrap();
    let mut hog_reader = BufReader::new(hog);
    hog_writer.write_all(b"REQUEST 60000\n").unwrap();
    let line = read_line_from(&mut hog_reader);
    assert!(line.contains("is assigned to the tool 0."));

    // Give the hog time to pass the minimum slice.
    thread::sleep(Duration::from_millis(120));

    // Second client arrives with an equal share and preempts on request.
    let newcomer = TcpStream::connect(addr).unwrap();
    newcomer
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut new_writer = newcomer.try_clone().unwrap();
    let mut new_reader = BufReader::new(newcomer);
    new_writer.write_all(b"REQUEST 100\n").unwrap();

    let evicted = read_line_from(&mut hog_reader);
    assert!(evicted.contains("is removed from the tool 0."));
    let granted = read_line_from(&mut new_reader);
    assert!(granted.contains("is assigned to the tool 0."));

    // When the newcomer finishes, the hog rotates back in.
    let done = read_line_from(&mut new_reader);
    assert!(done.contains("leaves the tool 0."));
    let back = read_line_from(&mut hog_reader);
    assert!(back.contains("is assigned to the tool 0."));

    shared.trigger_shutdown();
    server_thread.join().unwrap();
}

#[test]
fn test_disconnect_releases_tool_to_waiter() {
    let server = Server::bind("127.0.0.1:0", quick_config()).unwrap();
    let addr = server.local_tcp_addr().unwrap();
    let shared = server.shared();
    let server_thread = thread::spawn(move || server.run().unwrap());

    let holder = TcpStream::connect(addr).unwrap();
    holder.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut holder_writer = holder.try_clone().unwrap();
    let mut holder_reader = BufReader::new(holder.try_clone().unwrap());
    holder_writer.write_all(b"REQUEST 60000\n").unwrap();
    assert!(read_line_from(&mut holder_reader).contains("is assigned"));

    // Keep the holder under its minimum slice so the waiter queues.
    let waiter = TcpStream::connect(addr).unwrap();
    waiter.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut waiter_writer = waiter.try_clone().unwrap();
    let mut waiter_reader = BufReader::new(waiter);
    waiter_writer.write_all(b"REQUEST 100\n").unwrap();

    // The holder drops its connection: the tool is released and handed over.
    drop(holder_writer);
    drop(holder_reader);
    holder.shutdown(std::net::Shutdown::Both).unwrap();

    let granted = read_line_from(&mut waiter_reader);
    assert!(granted.contains("is assigned to the tool 0."));
    let done = read_line_from(&mut waiter_reader);
    assert!(done.contains("leaves the tool 0."));

    shared.trigger_shutdown();
    server_thread.join().unwrap();
}

#[test]
fn test_arena_capacity_rejects_connection() {
    let config = quick_config().with_max_customers(1);
    let server = Server::bind("127.0.0.1:0", config).unwrap();
    let addr = server.local_tcp_addr().unwrap();
    let shared = server.shared();
    let server_thread = thread::spawn(move || server.run().unwrap());

    let first = TcpStream::connect(addr).unwrap();
    first.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut first_writer = first.try_clone().unwrap();
    let mut first_reader = BufReader::new(first);
    first_writer.write_all(b"REQUEST 50\n").unwrap();
    assert!(read_line_from(&mut first_reader).contains("is assigned"));

    // The arena holds one customer; the next connection is turned away.
    let second = TcpStream::connect(addr).unwrap();
    second
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut buf = Vec::new();
    let mut second_reader = BufReader::new(second);
    let n = second_reader.read_to_end(&mut buf).unwrap();
    assert_eq!(n, 0, "rejected connection should close without output");

    shared.trigger_shutdown();
    server_thread.join().unwrap();
}
