//! Exercises the Connection Handler through the crate's public API only,
//! the way the teacher's `tests/client_get.rs` and friends drove the
//! client against a live backend -- here the "backend" is an in-process
//! `tokio::io::duplex` pair instead of a PHP-FPM socket.

use async_trait::async_trait;
use fastcgi_engine::{FcgiResult, Request, Response, Shutdown};
use fastcgi_engine::nvpair::encode_pairs;
use fastcgi_engine::record::{self, Decoded, Role};
use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

struct Greeter;

#[async_trait]
impl fastcgi_engine::RequestHandler for Greeter {
    async fn call(&self, req: Request, res: &mut Response) -> FcgiResult<()> {
        if req.path == "/fail" {
            return Err(fastcgi_engine::FcgiError::HandlerFailure {
                reason: "intentional failure".to_string(),
            });
        }
        res.send(format!("hello from {}", req.path))
    }
}

fn begin_request(id: u16, keep_conn: bool) -> Vec<u8> {
    record::encode_record(
        record::RecordType::BeginRequest,
        id,
        &record::encode_begin_request_body(Role::Responder, keep_conn),
    )
}

#[tokio::test]
async fn full_request_response_cycle_over_a_duplex_stream() {
    let (mut client, server) = duplex(8192);
    let server_task = tokio::spawn(async move {
        fastcgi_engine::conn::handle(server, &Greeter, 100, 100, Shutdown::new()).await.unwrap();
    });

    let mut input = Vec::new();
    input.extend(begin_request(1, false));
    input.extend(record::encode_record(
        record::RecordType::Params,
        1,
        &encode_pairs(vec![("REQUEST_URI", "/greet"), ("REQUEST_METHOD", "GET")]),
    ));
    input.extend(record::encode_record(record::RecordType::Params, 1, &[]));
    input.extend(record::encode_record(record::RecordType::Stdin, 1, &[]));
    client.write_all(&input).await.unwrap();

    let mut out = Vec::new();
    client.read_to_end(&mut out).await.unwrap();
    server_task.await.unwrap();

    let Decoded::Record { header, content, .. } = record::decode_record(&out).unwrap() else {
        panic!("expected a STDOUT record");
    };
    assert_eq!(header.r#type, record::RecordType::Stdout);
    let body = String::from_utf8_lossy(content);
    assert!(body.contains("hello from /greet"));
    assert!(body.starts_with("Status: 200 OK\r\n"));
}

#[tokio::test]
async fn handler_failure_still_produces_a_well_formed_response() {
    let (mut client, server) = duplex(8192);
    let server_task = tokio::spawn(async move {
        fastcgi_engine::conn::handle(server, &Greeter, 100, 100, Shutdown::new()).await.unwrap();
    });

    let mut input = Vec::new();
    input.extend(begin_request(1, false));
    input.extend(record::encode_record(
        record::RecordType::Params,
        1,
        &encode_pairs(vec![("REQUEST_URI", "/fail")]),
    ));
    input.extend(record::encode_record(record::RecordType::Params, 1, &[]));
    input.extend(record::encode_record(record::RecordType::Stdin, 1, &[]));
    client.write_all(&input).await.unwrap();

    let mut out = Vec::new();
    client.read_to_end(&mut out).await.unwrap();
    server_task.await.unwrap();

    let Decoded::Record { content, .. } = record::decode_record(&out).unwrap() else {
        panic!("expected a STDOUT record");
    };
    let body = String::from_utf8_lossy(content);
    assert!(body.starts_with("Status: 500 Internal Server Error\r\n"));
    assert!(body.contains("intentional failure"));
}

#[tokio::test]
async fn unsupported_role_ends_request_without_invoking_handler() {
    let (mut client, server) = duplex(8192);

    struct Panics;
    #[async_trait]
    impl fastcgi_engine::RequestHandler for Panics {
        async fn call(&self, _req: Request, _res: &mut Response) -> FcgiResult<()> {
            panic!("handler must not run for an unsupported role");
        }
    }

    let server_task = tokio::spawn(async move {
        fastcgi_engine::conn::handle(server, &Panics, 100, 100, Shutdown::new()).await.unwrap();
    });

    let mut input = Vec::new();
    input.extend(record::encode_record(
        record::RecordType::BeginRequest,
        1,
        &record::encode_begin_request_body(Role::Filter, false),
    ));
    client.write_all(&input).await.unwrap();

    let mut out = Vec::new();
    client.read_to_end(&mut out).await.unwrap();
    server_task.await.unwrap();

    let Decoded::Record { header, .. } = record::decode_record(&out).unwrap() else {
        panic!("expected an END_REQUEST record");
    };
    assert_eq!(header.r#type, record::RecordType::EndRequest);
}

#[tokio::test]
async fn shutdown_signal_closes_an_idle_keep_alive_connection() {
    let (mut client, server) = duplex(8192);
    let shutdown = Shutdown::new();
    let server_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            fastcgi_engine::conn::handle(server, &Greeter, 100, 100, shutdown).await.unwrap();
        }
    });

    let mut input = Vec::new();
    input.extend(begin_request(1, true));
    input.extend(record::encode_record(
        record::RecordType::Params,
        1,
        &encode_pairs(vec![("REQUEST_URI", "/greet")]),
    ));
    input.extend(record::encode_record(record::RecordType::Params, 1, &[]));
    input.extend(record::encode_record(record::RecordType::Stdin, 1, &[]));
    client.write_all(&input).await.unwrap();

    // drain the response; the connection stays open since keep_conn is true
    // and no more bytes follow.
    let mut buf = [0u8; 1024];
    client.read(&mut buf).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(!server_task.is_finished(), "keep-alive connection must stay open on its own");

    shutdown.signal();
    server_task.await.unwrap();
}
