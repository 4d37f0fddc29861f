/*
 * FeatherMail SMTP server framework
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

//! End-to-end scenarios: one submission agent pipeline, limits, blocking
//! and hot reload, each over a full scripted session.

use crate::run_test;
use feather_pipeline::{PipelineHandle, PipelineSpec};

const GREETING: &str = "220 testserver.com feathermail ready 1\r\n";

const EHLO_REPLY: &str = concat!(
    "250-testserver.com\r\n",
    "250-SIZE 1000000\r\n",
    "250-PIPELINING\r\n",
    "250-8BITMIME\r\n",
    "250 ENHANCEDSTATUSCODES\r\n",
);

const EHLO_SECURED: &str = concat!(
    "250-testserver.com\r\n",
    "250-SIZE 1000000\r\n",
    "250-PIPELINING\r\n",
    "250-8BITMIME\r\n",
    "250-ENHANCEDSTATUSCODES\r\n",
    "250 AUTH PLAIN LOGIN\r\n",
);

fn secured() -> feather_config::Config {
    let mut config = crate::config::local_test();
    config.server.session_options.tls = feather_config::TlsMode::IfAvailable;
    config
}

// a complete submission agent: authentication, relay control, local file
// delivery; the message lands on disk byte for byte
#[tokio::test]
async fn happy_path_msa() {
    let maildir = std::env::temp_dir().join(format!("feather-msa-{:08x}", rand::random::<u32>()));

    let pipeline = format!(
        r#"
[[stage]]
kind = "simple_auth"
users = {{ alice = "secret" }}

[[stage]]
kind = "relay_control"
local_domains = ["example.com"]

[[stage]]
kind = "by_domain"

[stage.routes.default]
kind = "local_file"
dirpath = "{}"
"#,
        maildir.display()
    );

    run_test! {
        input = [
            "EHLO client.com\r\n",
            "AUTH PLAIN AGFsaWNlAHNlY3JldA==\r\n",
            "MAIL FROM:<alice@example.com>\r\n",
            "RCPT TO:<bob@elsewhere.com>\r\n",
            "DATA\r\n",
            "Subject: hi\r\n",
            "\r\n",
            "hi\r\n",
            ".\r\n",
            "QUIT\r\n",
        ]
        .concat(),
        expected = [
            GREETING,
            EHLO_SECURED,
            "235 2.7.0 Authentication succeeded\r\n",
            "250 Ok\r\n",
            "250 Ok\r\n",
            "354 Start mail input; end with <CRLF>.<CRLF>\r\n",
            "250 2.0.0 OK: message accepted\r\n",
            "221 Service closing transmission channel\r\n",
        ]
        .concat(),
        config = secured(),
        pipeline = &pipeline,
        tls_active = true,
    };

    let mailbox = maildir.join("bob");
    let entries = std::fs::read_dir(&mailbox)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(
        std::fs::read(entries[0].path()).unwrap(),
        b"Subject: hi\r\n\r\nhi\r\n",
        "payload on disk equals the DATA payload sans terminator"
    );

    std::fs::remove_dir_all(&maildir).unwrap();
}

// two recipients are fine, the third one trips the limit
#[tokio::test]
async fn recipient_limit() {
    run_test! {
        input = [
            "EHLO client.com\r\n",
            "MAIL FROM:<alice@example.com>\r\n",
            "RCPT TO:<a@example.com>\r\n",
            "RCPT TO:<b@example.com>\r\n",
            "RCPT TO:<c@example.com>\r\n",
            "QUIT\r\n",
        ]
        .concat(),
        expected = [
            GREETING,
            EHLO_REPLY,
            "250 Ok\r\n",
            "250 Ok\r\n",
            "250 Ok\r\n",
            "452 4.5.3 Too many recipients (max: 2)\r\n",
            "221 Service closing transmission channel\r\n",
        ]
        .concat(),
        pipeline = r#"
[[stage]]
kind = "no_auth"

[[stage]]
kind = "recipient_limit"
max_recipients = 2
"#,
    };
}

// a blocked peer is refused at the first pipeline phase
#[tokio::test]
async fn blocked_ip_early() {
    run_test! {
        input = ["EHLO client.com\r\n", "QUIT\r\n"].concat(),
        expected = [
            GREETING,
            "554 5.7.1 Access denied from your IP address\r\n",
            "221 Service closing transmission channel\r\n",
        ]
        .concat(),
        pipeline = r#"
[[stage]]
kind = "ip_filter"
blocked_ips = ["203.0.113.0/24"]

[[stage]]
kind = "no_auth"
"#,
        peer = "203.0.113.7",
    };
}

// the cross-session counter in the shared store trips on the third
// submission from the same peer
#[tokio::test]
async fn rate_limited_third_message() {
    let store = std::sync::Arc::new(feather_store::TtlStore::new());

    const PIPELINE: &str = r#"
[[stage]]
kind = "no_auth"

[[stage]]
kind = "message_rate_limit"
max_messages = 2
time_window = "1m"
"#;

    for _ in 0..2 {
        run_test! {
            input = [
                "EHLO client.com\r\n",
                "MAIL FROM:<alice@example.com>\r\n",
                "QUIT\r\n",
            ]
            .concat(),
            expected = [
                GREETING,
                EHLO_REPLY,
                "250 Ok\r\n",
                "221 Service closing transmission channel\r\n",
            ]
            .concat(),
            pipeline = PIPELINE,
            store = store.clone(),
        };
    }

    run_test! {
        input = [
            "EHLO client.com\r\n",
            "MAIL FROM:<alice@example.com>\r\n",
            "QUIT\r\n",
        ]
        .concat(),
        expected = [
            GREETING,
            EHLO_REPLY,
            "450 4.7.1 Rate limit exceeded: too many messages from your IP (max: 2 per 1m)\r\n",
            "221 Service closing transmission channel\r\n",
        ]
        .concat(),
        pipeline = PIPELINE,
        store = store,
    };
}

// a session accepted before the reload keeps its pipeline; the next
// session runs the new one
#[tokio::test]
async fn hot_reload_affects_new_sessions_only() {
    let handle = PipelineHandle::new(
        PipelineSpec::from_toml(
            r#"
[[stage]]
kind = "no_auth"

[[stage]]
kind = "recipient_limit"
max_recipients = 1
"#,
        )
        .unwrap(),
    );

    // session A binds its snapshot now
    let bound_by_a = handle.snapshot();

    // the operator rewrites the pipeline
    handle.update(
        PipelineSpec::from_toml(
            r#"
[[stage]]
kind = "no_auth"

[[stage]]
kind = "recipient_limit"
max_recipients = 3
"#,
        )
        .unwrap(),
    );

    // session A still limits at 1
    run_test! {
        input = [
            "EHLO client.com\r\n",
            "MAIL FROM:<alice@example.com>\r\n",
            "RCPT TO:<a@example.com>\r\n",
            "RCPT TO:<b@example.com>\r\n",
            "QUIT\r\n",
        ]
        .concat(),
        expected = [
            GREETING,
            EHLO_REPLY,
            "250 Ok\r\n",
            "250 Ok\r\n",
            "452 4.5.3 Too many recipients (max: 1)\r\n",
            "221 Service closing transmission channel\r\n",
        ]
        .concat(),
        spec = bound_by_a,
    };

    // session B picks up the reloaded spec
    run_test! {
        input = [
            "EHLO client.com\r\n",
            "MAIL FROM:<alice@example.com>\r\n",
            "RCPT TO:<a@example.com>\r\n",
            "RCPT TO:<b@example.com>\r\n",
            "QUIT\r\n",
        ]
        .concat(),
        expected = [
            GREETING,
            EHLO_REPLY,
            "250 Ok\r\n",
            "250 Ok\r\n",
            "250 Ok\r\n",
            "221 Service closing transmission channel\r\n",
        ]
        .concat(),
        spec = handle.snapshot(),
    };
}

// over-sized DATA is refused with 552 and the rest of the body is
// drained cleanly
#[tokio::test]
async fn message_size_exceeded() {
    let mut config = crate::config::local_test();
    config.server.session_options.max_message_size = 64;

    run_test! {
        input = [
            "EHLO client.com\r\n",
            "MAIL FROM:<alice@example.com>\r\n",
            "RCPT TO:<bob@example.com>\r\n",
            "DATA\r\n",
            &"x".repeat(100),
            "\r\n",
            ".\r\n",
            "QUIT\r\n",
        ]
        .concat(),
        expected = [
            "220 testserver.com feathermail ready 1\r\n",
            "250-testserver.com\r\n",
            "250-SIZE 64\r\n",
            "250-PIPELINING\r\n",
            "250-8BITMIME\r\n",
            "250 ENHANCEDSTATUSCODES\r\n",
            "250 Ok\r\n",
            "250 Ok\r\n",
            "354 Start mail input; end with <CRLF>.<CRLF>\r\n",
            "552 5.3.4 Message size exceeds fixed limit\r\n",
            "221 Service closing transmission channel\r\n",
        ]
        .concat(),
        config = config,
        pipeline = r#"
[[stage]]
kind = "no_auth"
"#,
    };
}

// PIPELINING is advertised and batched commands are served in order
#[tokio::test]
async fn pipelined_commands() {
    run_test! {
        input = concat!(
            "EHLO client.com\r\n",
            "MAIL FROM:<alice@example.com>\r\nRCPT TO:<bob@example.com>\r\nDATA\r\n",
            "hi\r\n.\r\nQUIT\r\n",
        ),
        expected = [
            GREETING,
            EHLO_REPLY,
            "250 Ok\r\n",
            "250 Ok\r\n",
            "354 Start mail input; end with <CRLF>.<CRLF>\r\n",
            "250 2.0.0 OK: message accepted\r\n",
            "221 Service closing transmission channel\r\n",
        ]
        .concat(),
        pipeline = r#"
[[stage]]
kind = "no_auth"
"#,
    };
}
