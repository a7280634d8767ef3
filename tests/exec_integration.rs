//! Integration tests for remote command execution
//!
//! These run against a fake daemon that speaks the exec websocket protocol:
//! one channel per fd, an empty frame marking end of stream, and the exit
//! code published in the operation metadata.

mod common;

use common::{ExecScript, FakeDaemon};
use lxdc::{Decode, Error, ExecOptions, ExecOutput, Instance, TextEncoding};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

mod execute_tests {
    use super::*;

    /// Test buffered echo returns exit code and both streams
    #[tokio::test]
    async fn test_echo_buffers_output() {
        let daemon = FakeDaemon::start(ExecScript::stdout(&["test\n"])).await;
        let client = daemon.client().await;
        let instance = Instance::partial(&client, "c1");

        let result = assert_ok!(instance.execute(["echo", "test"], ExecOptions::new()).await);

        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "test\n");
        assert_eq!(result.stderr, "");
        assert!(result.success());

        let requests = daemon.exec_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0]["command"], serde_json::json!(["echo", "test"]));
        assert_eq!(requests[0]["wait-for-websocket"], true);
        assert_eq!(requests[0]["interactive"], false);
        assert_eq!(daemon.websockets_opened(), 3);
    }

    /// Test stdout callback receives chunks in order and nothing is buffered
    #[tokio::test]
    async fn test_stdout_callback_streams_chunks() {
        let daemon = FakeDaemon::start(ExecScript::stdout(&["te", "st\n"])).await;
        let client = daemon.client().await;
        let instance = Instance::partial(&client, "c1");

        let chunks = Arc::new(Mutex::new(Vec::new()));
        let sink = chunks.clone();
        let options = ExecOptions::new().on_stdout(move |chunk| {
            sink.lock().unwrap().push(chunk.to_text());
        });

        let result = instance.execute(["echo", "test"], options).await.unwrap();

        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "");
        let chunks = chunks.lock().unwrap();
        assert_eq!(chunks.as_slice(), ["te", "st\n"]);
        assert_eq!(chunks.concat(), "test\n");
    }

    /// Test a character split across frames reaches the callback intact
    #[tokio::test]
    async fn test_stdout_callback_split_utf8() {
        let script = ExecScript {
            stdout: vec![vec![b'h', 0xc3], vec![0xa9, b'\n']],
            ..ExecScript::default()
        };
        let daemon = FakeDaemon::start(script).await;
        let client = daemon.client().await;
        let instance = Instance::partial(&client, "c1");

        let chunks = Arc::new(Mutex::new(Vec::new()));
        let sink = chunks.clone();
        let options = ExecOptions::new().on_stdout(move |chunk| {
            sink.lock().unwrap().push(chunk.to_text());
        });

        let result = instance.execute(["printf", "hé\n"], options).await.unwrap();

        assert_eq!(result.stdout, "");
        let chunks = chunks.lock().unwrap();
        assert_eq!(chunks.concat(), "hé\n");
        assert!(chunks.iter().all(|c| !c.contains('\u{fffd}')));
    }

    /// Test output still open when the exit code appears is drained in full
    #[tokio::test]
    async fn test_exit_before_output_is_flushed() {
        let script = ExecScript {
            stdout: vec![b"line 1\n".to_vec(), b"line 2\n".to_vec()],
            stderr: vec![b"warning\n".to_vec()],
            exit_code: 0,
            early_exit: true,
            ..ExecScript::default()
        };
        let daemon = FakeDaemon::start(script).await;
        let client = daemon.client().await;
        let instance = Instance::partial(&client, "c1");

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            instance.execute(["sh", "-c", "echo"], ExecOptions::new()),
        )
        .await
        .expect("exec should not hang once the exit code is known")
        .unwrap();

        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "line 1\nline 2\n");
        assert_eq!(result.stderr, "warning\n");
    }

    /// Test raw decoding returns non-UTF-8 bytes unchanged
    #[tokio::test]
    async fn test_raw_decode_keeps_bytes() {
        let bytes = vec![0xff, 0xfe, 0x00, 0x80, b'\n'];
        let script = ExecScript {
            stdout: vec![bytes.clone()],
            ..ExecScript::default()
        };
        let daemon = FakeDaemon::start(script).await;
        let client = daemon.client().await;
        let instance = Instance::partial(&client, "c1");

        let result = instance
            .execute(["head", "-c5", "/dev/urandom"], ExecOptions::new().with_decode(Decode::Raw))
            .await
            .unwrap();

        assert_eq!(result.stdout, ExecOutput::Bytes(bytes));
        assert_eq!(result.stderr, ExecOutput::Bytes(Vec::new()));
    }

    /// Test explicit encoding is applied to buffered output
    #[tokio::test]
    async fn test_explicit_encoding() {
        let script = ExecScript {
            stdout: vec![vec![b'c', b'a', b'f', 0xe9]],
            ..ExecScript::default()
        };
        let daemon = FakeDaemon::start(script).await;
        let client = daemon.client().await;
        let instance = Instance::partial(&client, "c1");

        let options = ExecOptions::new().with_decode(Decode::Encoding(TextEncoding::Latin1));
        let result = instance.execute(["cat", "menu"], options).await.unwrap();

        assert_eq!(result.stdout, "café");
    }

    /// Test text frames are decoded with the declared encoding
    #[tokio::test]
    async fn test_text_frames() {
        let script = ExecScript {
            stdout: vec!["héllo\n".as_bytes().to_vec()],
            text_frames: true,
            ..ExecScript::default()
        };
        let daemon = FakeDaemon::start(script).await;
        let client = daemon.client().await;
        let instance = Instance::partial(&client, "c1");

        let result = instance.execute(["echo", "héllo"], ExecOptions::new()).await.unwrap();
        assert_eq!(result.stdout, "héllo\n");
    }

    /// Test stdin payload reaches the process before it sees EOF
    #[tokio::test]
    async fn test_stdin_payload() {
        let script = ExecScript {
            echo_stdin: true,
            ..ExecScript::default()
        };
        let daemon = FakeDaemon::start(script).await;
        let client = daemon.client().await;
        let instance = Instance::partial(&client, "c1");

        let result = instance
            .execute(["cat"], ExecOptions::new().with_stdin("hello from stdin"))
            .await
            .unwrap();

        assert_eq!(daemon.stdin_received(), b"hello from stdin");
        assert_eq!(result.stdout, "hello from stdin");
    }

    /// Test stdin from a reader is streamed in full
    #[tokio::test]
    async fn test_stdin_reader() {
        let script = ExecScript {
            echo_stdin: true,
            ..ExecScript::default()
        };
        let daemon = FakeDaemon::start(script).await;
        let client = daemon.client().await;
        let instance = Instance::partial(&client, "c1");

        let payload = vec![b'x'; 20_000];
        let options = ExecOptions {
            stdin: Some(lxdc::exec::StdinPayload::Reader(Box::new(std::io::Cursor::new(
                payload.clone(),
            )))),
            decode: Decode::Raw,
            ..ExecOptions::default()
        };
        let result = instance.execute(["cat"], options).await.unwrap();

        assert_eq!(daemon.stdin_received(), payload);
        assert_eq!(result.stdout, ExecOutput::Bytes(payload));
    }

    /// Test non-zero exit and stderr are reported
    #[tokio::test]
    async fn test_nonzero_exit_with_stderr() {
        let script = ExecScript {
            stderr: vec![b"boom\n".to_vec()],
            exit_code: 2,
            ..ExecScript::default()
        };
        let daemon = FakeDaemon::start(script).await;
        let client = daemon.client().await;
        let instance = Instance::partial(&client, "c1");

        let result = instance.execute(["false"], ExecOptions::new()).await.unwrap();

        assert_eq!(result.exit_code, 2);
        assert_eq!(result.stdout, "");
        assert_eq!(result.stderr, "boom\n");
        assert!(!result.success());
    }

    /// Test a failed exec operation surfaces as OperationFailed
    #[tokio::test]
    async fn test_failed_operation() {
        let script = ExecScript {
            failure: Some("Command not found".to_string()),
            ..ExecScript::default()
        };
        let daemon = FakeDaemon::start(script).await;
        let client = daemon.client().await;
        let instance = Instance::partial(&client, "c1");

        let err = instance
            .execute(["does-not-exist"], ExecOptions::new())
            .await
            .unwrap_err();

        match err {
            Error::OperationFailed { message, .. } => assert_eq!(message, "Command not found"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    /// Test empty argv is rejected before any request
    #[tokio::test]
    async fn test_empty_command_rejected_without_request() {
        let daemon = FakeDaemon::start(ExecScript::default()).await;
        let client = daemon.client().await;
        let instance = Instance::partial(&client, "c1");

        let err = assert_err!(instance.execute(Vec::<String>::new(), ExecOptions::new()).await);

        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(daemon.exec_requests().is_empty());
        assert_eq!(daemon.websockets_opened(), 0);
    }
}

mod raw_interactive_tests {
    use super::*;

    /// Test raw interactive mode only returns the channel URLs
    #[tokio::test]
    async fn test_returns_ws_and_control_urls() {
        let daemon = FakeDaemon::start(ExecScript::default()).await;
        let client = daemon.client().await;
        let instance = Instance::partial(&client, "c1");

        let session = instance
            .raw_interactive_execute(["/bin/bash"], &ExecOptions::new())
            .await
            .unwrap();

        assert_eq!(session.operation_id, daemon.operation_id());
        assert_eq!(session.ws.scheme(), "ws");
        assert!(session.ws.as_str().ends_with("/websocket?secret=secret-0"));
        assert!(session.control.as_str().ends_with("/websocket?secret=secret-control"));

        let requests = daemon.exec_requests();
        assert_eq!(requests[0]["interactive"], true);
        assert_eq!(daemon.websockets_opened(), 0);
    }
}
