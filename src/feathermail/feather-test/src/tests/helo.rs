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

use crate::run_test;

const GREETING: &str = "220 testserver.com feathermail ready 1\r\n";

fn tls_if_available() -> feather_config::Config {
    let mut config = crate::config::local_test();
    config.server.session_options.tls = feather_config::TlsMode::IfAvailable;
    config
}

#[tokio::test]
async fn helo_basic() {
    run_test! {
        input = ["HELO client.com\r\n", "QUIT\r\n"].concat(),
        expected = [
            GREETING,
            "250 Ok\r\n",
            "221 Service closing transmission channel\r\n",
        ]
        .concat(),
    };
}

#[tokio::test]
async fn ehlo_capabilities_without_tls() {
    run_test! {
        input = ["EHLO client.com\r\n", "QUIT\r\n"].concat(),
        expected = [
            GREETING,
            "250-testserver.com\r\n",
            "250-SIZE 1000000\r\n",
            "250-PIPELINING\r\n",
            "250-8BITMIME\r\n",
            "250 ENHANCEDSTATUSCODES\r\n",
            "221 Service closing transmission channel\r\n",
        ]
        .concat(),
    };
}

// with tls = "if_available" and no TLS yet, STARTTLS is advertised and
// AUTH is not
#[tokio::test]
async fn ehlo_advertises_starttls_not_auth() {
    run_test! {
        input = ["EHLO client.com\r\n", "QUIT\r\n"].concat(),
        expected = [
            GREETING,
            "250-testserver.com\r\n",
            "250-SIZE 1000000\r\n",
            "250-PIPELINING\r\n",
            "250-8BITMIME\r\n",
            "250-ENHANCEDSTATUSCODES\r\n",
            "250 STARTTLS\r\n",
            "221 Service closing transmission channel\r\n",
        ]
        .concat(),
        config = tls_if_available(),
    };
}

// once the session is secured, AUTH is advertised and STARTTLS is gone
#[tokio::test]
async fn ehlo_advertises_auth_under_tls() {
    run_test! {
        input = ["EHLO client.com\r\n", "QUIT\r\n"].concat(),
        expected = [
            GREETING,
            "250-testserver.com\r\n",
            "250-SIZE 1000000\r\n",
            "250-PIPELINING\r\n",
            "250-8BITMIME\r\n",
            "250-ENHANCEDSTATUSCODES\r\n",
            "250 AUTH PLAIN LOGIN\r\n",
            "221 Service closing transmission channel\r\n",
        ]
        .concat(),
        config = tls_if_available(),
        tls_active = true,
    };
}

#[tokio::test]
async fn helo_bad_argument() {
    run_test! {
        input = [
            "EHLO not\\a.valid\"domain\r\n",
            "EHLO \r\n",
            "QUIT\r\n",
        ]
        .concat(),
        expected = [
            GREETING,
            "501 Syntax error in parameters or arguments\r\n",
            "501 Syntax error in parameters or arguments\r\n",
            "221 Service closing transmission channel\r\n",
        ]
        .concat(),
    };
}

#[tokio::test]
async fn ehlo_with_address_literal() {
    run_test! {
        input = ["EHLO [192.0.2.1]\r\n", "QUIT\r\n"].concat(),
        expected = [
            GREETING,
            "250-testserver.com\r\n",
            "250-SIZE 1000000\r\n",
            "250-PIPELINING\r\n",
            "250-8BITMIME\r\n",
            "250 ENHANCEDSTATUSCODES\r\n",
            "221 Service closing transmission channel\r\n",
        ]
        .concat(),
    };
}

#[tokio::test]
async fn ancillary_verbs() {
    run_test! {
        input = [
            "NOOP\r\n",
            "HELP\r\n",
            "VRFY someone\r\n",
            "FOOBAR\r\n",
            "QUIT\r\n",
        ]
        .concat(),
        expected = [
            GREETING,
            "250 Ok\r\n",
            "214 2.0.0 See https://feathermail.org/docs\r\n",
            "252 Not supported\r\n",
            "500 5.5.2 Command unrecognized\r\n",
            "221 Service closing transmission channel\r\n",
        ]
        .concat(),
    };
}

// starttls without usable TLS material is refused but not fatal
#[tokio::test]
async fn starttls_not_available() {
    run_test! {
        input = ["EHLO client.com\r\n", "STARTTLS\r\n", "QUIT\r\n"].concat(),
        expected = [
            GREETING,
            "250-testserver.com\r\n",
            "250-SIZE 1000000\r\n",
            "250-PIPELINING\r\n",
            "250-8BITMIME\r\n",
            "250 ENHANCEDSTATUSCODES\r\n",
            "454 TLS not available\r\n",
            "221 Service closing transmission channel\r\n",
        ]
        .concat(),
    };
}

// the client dropping without QUIT still runs the terminate hooks
#[tokio::test]
async fn disconnect_without_quit() {
    let handler = run_test! {
        input = "EHLO client.com\r\n".to_string(),
        expected = [
            GREETING,
            "250-testserver.com\r\n",
            "250-SIZE 1000000\r\n",
            "250-PIPELINING\r\n",
            "250-8BITMIME\r\n",
            "250 ENHANCEDSTATUSCODES\r\n",
        ]
        .concat(),
    };
    assert!(handler.meta().helo.is_some());
}
