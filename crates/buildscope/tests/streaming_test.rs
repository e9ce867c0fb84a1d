//! Streaming-path tests: incremental delivery, buffered equivalence and
//! subprocess cleanup on early termination.

#![cfg(unix)]

mod common;

use std::time::Duration;

use buildscope::{OutputFormat, QueryService};
use common::{init_tracing, stub_engine};
use futures::StreamExt;
use nix::sys::signal::kill;
use nix::unistd::Pid;

#[tokio::test]
async fn stream_query_yields_records_in_emission_order() {
    init_tracing();
    let stub = stub_engine(concat!(
        "echo '{\"name\":\"//lib:base\",\"ruleClass\":\"cc_library\"}'\n",
        "echo '{\"name\":\"//app:main\",\"ruleClass\":\"cc_binary\"}'",
    ));
    let service = QueryService::new(stub.config.clone());

    let stream = service
        .stream_query("//...", OutputFormat::StreamedJson)
        .await
        .unwrap();
    let targets: Vec<_> = stream.map(|t| t.unwrap()).collect().await;
    assert_eq!(targets.len(), 2);
    assert_eq!(targets[0].label.as_str(), "//lib:base");
    assert_eq!(targets[1].label.as_str(), "//app:main");
}

#[tokio::test]
async fn streaming_matches_buffered_query() {
    init_tracing();
    let stub = stub_engine(concat!(
        "echo 'cc_library rule //lib:base'\n",
        "echo 'cc_binary rule //app:main'\n",
        "echo 'cc_test rule //lib:base_test'",
    ));
    let service = QueryService::new(stub.config.clone());

    let buffered = service
        .query("//...", OutputFormat::LabelKind)
        .await
        .unwrap();
    let streamed: Vec<_> = service
        .stream_query("//...", OutputFormat::LabelKind)
        .await
        .unwrap()
        .map(|t| t.unwrap())
        .collect()
        .await;
    assert_eq!(streamed, buffered.targets);
}

#[tokio::test]
async fn dropping_the_stream_kills_the_subprocess() {
    init_tracing();
    // The stub emits one record, then hangs long past the test.
    let stub = stub_engine("echo '//lib:base'\nsleep 600\necho '//lib:late'");
    let service = QueryService::new(stub.config.clone());

    let mut stream = service
        .stream_query("//...", OutputFormat::Label)
        .await
        .unwrap();
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.label.as_str(), "//lib:base");

    let pid = Pid::from_raw(stream.pid().unwrap() as i32);
    // Alive while the stream is held.
    assert!(kill(pid, None).is_ok());

    drop(stream);

    // The cleanup task kills and reaps the child shortly after the drop.
    let mut gone = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if kill(pid, None).is_err() {
            gone = true;
            break;
        }
    }
    assert!(gone, "subprocess survived stream drop");
}

#[tokio::test]
async fn malformed_stream_surfaces_a_parse_error() {
    init_tracing();
    let stub = stub_engine("echo '//lib:base'\necho 'not a : valid : label'");
    let service = QueryService::new(stub.config.clone());

    let mut stream = service
        .stream_query("//...", OutputFormat::Label)
        .await
        .unwrap();
    assert!(stream.next().await.unwrap().is_ok());
    assert!(stream.next().await.unwrap().is_err());
}
