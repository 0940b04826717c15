use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::thread;

use wattsup::collector::Collector;
use wattsup::session::data::Reply;
use wattsup::session::sink::{NetworkSink, Sink, SinkError};

fn sample(watts: u32) -> wattsup::session::data::Sample {
    let line = format!("#d,-,18,{watts},1200,40,12,0,0,0,75,1210,62,10,1190,8,100,50,3,600,52;");
    match Reply::parse(&line).unwrap() {
        Reply::Data(sample) => sample,
        other => panic!("expected a data record, got {other:?}"),
    }
}

#[test]
fn network_sink_posts_to_collector() {
    let collector = Collector::bind_addr(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
    let addr = collector.local_addr().unwrap();

    let server = thread::spawn(move || {
        let mut out = Vec::new();
        let reading = collector.serve_one(&mut out).unwrap();
        (reading, String::from_utf8(out).unwrap())
    });

    let mut sink = NetworkSink::new("127.0.0.1", addr.port(), "/wattsup", "bench").unwrap();
    sink.dispatch(&sample(50)).unwrap();

    let (reading, printed) = server.join().unwrap();
    let reading = reading.expect("collector accepted the post");
    assert_eq!(reading.id, "bench");
    assert_eq!(reading.watts, 5.0);
    assert_eq!(reading.volts, 120.0);
    assert!((reading.amps - 0.04).abs() < 1e-9);
    assert_eq!(reading.max_volts, Some(121.0));
    assert_eq!(reading.frequency, Some(60.0));

    let json: serde_json::Value = serde_json::from_str(printed.trim()).unwrap();
    assert_eq!(json["watts"], 5.0);
    assert_eq!(json["id"], "bench");
    assert!(json.get("time").is_some());
}

#[test]
fn refused_post_is_reported_not_fatal() {
    let collector = Collector::bind_addr(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
    let addr = collector.local_addr().unwrap();
    drop(collector);

    let mut sink = NetworkSink::new("127.0.0.1", addr.port(), "/", "bench").unwrap();
    let err = sink.dispatch(&sample(50)).unwrap_err();
    assert!(matches!(err, SinkError::HttpError(_)));
}

/// Accept one request, read it fully and answer with `status_line`.
fn answer_once(listener: TcpListener, status_line: &'static str) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream);
        let mut length = 0;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    length = value.trim().parse().unwrap();
                }
            }
        }
        let mut body = vec![0; length];
        reader.read_exact(&mut body).unwrap();

        let mut stream = reader.into_inner();
        write!(stream, "{}\r\nContent-Length: 0\r\n\r\n", status_line).unwrap();
        stream.flush().unwrap();
        String::from_utf8(body).unwrap()
    })
}

#[test]
fn server_error_is_reported_as_status() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = answer_once(listener, "HTTP/1.1 500 Internal Server Error");

    let mut sink = NetworkSink::new("127.0.0.1", port, "/wattsup", "bench").unwrap();
    let err = sink.dispatch(&sample(50)).unwrap_err();

    assert!(matches!(err, SinkError::Status(status) if status.as_u16() == 500));
    let body = server.join().unwrap();
    assert!(body.contains("id=bench"));
}

#[test]
fn client_error_is_reported_as_status() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = answer_once(listener, "HTTP/1.1 404 Not Found");

    let mut sink = NetworkSink::new("127.0.0.1", port, "/missing", "bench").unwrap();
    let err = sink.dispatch(&sample(50)).unwrap_err();

    assert!(matches!(err, SinkError::Status(status) if status.as_u16() == 404));
    server.join().unwrap();
}
