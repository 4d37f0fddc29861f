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

use sha2::{Digest, Sha256};

/// Parameters of a DKIM signer.
#[derive(Debug, Clone)]
pub struct DkimParams {
    /// Selector under `_domainkey.<sdid>`.
    pub selector: String,
    /// Signing domain identifier (`d=`).
    pub sdid: String,
    /// Header fields covered by the signature (`h=`).
    pub headers: Vec<String>,
}

/// Signs messages with `rsa-sha256` and `relaxed/relaxed` canonicalization.
#[derive(Debug)]
pub struct DkimSigner {
    params: DkimParams,
    private_key: rsa::RsaPrivateKey,
}

/// Reduce sequences of WSP to a single space and trim the end of the line.
fn relax_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_wsp = false;
    for c in line.chars() {
        if c == ' ' || c == '\t' {
            in_wsp = true;
        } else {
            if in_wsp && !out.is_empty() {
                out.push(' ');
            }
            in_wsp = false;
            out.push(c);
        }
    }
    out
}

/// Relaxed body canonicalization (RFC6376 §3.4.4).
fn canonicalize_body(body: &str) -> String {
    let mut lines = body
        .split("\r\n")
        .map(relax_line)
        .collect::<Vec<_>>();

    while lines.last().map_or(false, String::is_empty) {
        lines.pop();
    }

    if lines.is_empty() {
        String::new()
    } else {
        let mut out = lines.join("\r\n");
        out.push_str("\r\n");
        out
    }
}

/// Relaxed header canonicalization (RFC6376 §3.4.2): lowercased name, no
/// space around the colon, unfolded and WSP-collapsed value.
fn canonicalize_header(name: &str, value: &str) -> String {
    format!(
        "{}:{}",
        name.to_lowercase().trim(),
        relax_line(&value.replace("\r\n", " ")).trim()
    )
}

/// Split a raw message into `(headers, body)`, unfolding continuation lines.
fn split_message(raw: &str) -> (Vec<(String, String)>, String) {
    let (header_block, body) = raw
        .split_once("\r\n\r\n")
        .map_or((raw, ""), |(h, b)| (h, b));

    let mut headers: Vec<(String, String)> = vec![];
    for line in header_block.split("\r\n") {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some((_, value)) = headers.last_mut() {
                value.push_str("\r\n");
                value.push_str(line);
            }
        } else if let Some((name, value)) = line.split_once(':') {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    (headers, body.to_string())
}

impl DkimSigner {
    /// Create a signer from its parameters and an RSA private key.
    #[must_use]
    pub fn new(params: DkimParams, private_key: rsa::RsaPrivateKey) -> Self {
        Self {
            params,
            private_key,
        }
    }

    /// Covered headers actually present in the message, last occurrence
    /// first as RFC6376 requires.
    fn select_headers<'a>(
        &self,
        headers: &'a [(String, String)],
    ) -> Vec<(&'a String, &'a String)> {
        self.params
            .headers
            .iter()
            .filter_map(|wanted| {
                headers
                    .iter()
                    .rev()
                    .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
                    .map(|(name, value)| (name, value))
            })
            .collect()
    }

    /// Compute the `DKIM-Signature` header value for `raw`.
    ///
    /// # Errors
    ///
    /// * the RSA signing operation failed
    pub fn signature_header(&self, raw: &str) -> anyhow::Result<String> {
        let (headers, body) = split_message(raw);

        let body_hash = base64::encode(Sha256::digest(canonicalize_body(&body).as_bytes()));

        let selected = self.select_headers(&headers);
        let signed_names = selected
            .iter()
            .map(|(name, _)| name.to_lowercase())
            .collect::<Vec<_>>()
            .join(":");

        let unsigned = format!(
            "v=1; a=rsa-sha256; c=relaxed/relaxed; d={}; s={}; h={}; bh={}; b=",
            self.params.sdid, self.params.selector, signed_names, body_hash,
        );

        let mut hasher = Sha256::new();
        for (name, value) in &selected {
            hasher.update(canonicalize_header(name, value).as_bytes());
            hasher.update(b"\r\n");
        }
        // the signature header itself, with b= empty and no trailing CRLF
        hasher.update(canonicalize_header("DKIM-Signature", &unsigned).as_bytes());

        let digest = hasher.finalize();
        let signature = self.private_key.sign(
            rsa::PaddingScheme::PKCS1v15Sign {
                hash: Some(rsa::hash::Hash::SHA2_256),
            },
            digest.as_slice(),
        )?;

        Ok(format!("{unsigned}{}", base64::encode(signature)))
    }

    /// Return `raw` with the `DKIM-Signature` header prepended.
    ///
    /// # Errors
    ///
    /// * the RSA signing operation failed
    pub fn sign(&self, raw: &str) -> anyhow::Result<String> {
        Ok(format!(
            "DKIM-Signature: {}\r\n{raw}",
            self.signature_header(raw)?
        ))
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use rsa::PublicKey;

    const MESSAGE: &str = concat!(
        "From: alice@example.com\r\n",
        "To: bob@elsewhere.com\r\n",
        "Subject: test \t message\r\n",
        "Date: Mon, 1 Jan 2022 00:00:00 +0000\r\n",
        "\r\n",
        "hello   world \r\n",
        "\r\n",
    );

    fn signer() -> DkimSigner {
        let mut rng = rand::thread_rng();
        DkimSigner::new(
            DkimParams {
                selector: "feather".to_string(),
                sdid: "example.com".to_string(),
                headers: ["From", "To", "Subject", "Date"]
                    .map(String::from)
                    .to_vec(),
            },
            rsa::RsaPrivateKey::new(&mut rng, 1024).unwrap(),
        )
    }

    #[test]
    fn relaxed_body() {
        assert_eq!(
            canonicalize_body(" C \r\nD \t E\r\n\r\n\r\n"),
            "C\r\nD E\r\n"
        );
        assert_eq!(canonicalize_body(""), "");
        assert_eq!(canonicalize_body("\r\n\r\n"), "");
    }

    #[test]
    fn relaxed_header() {
        assert_eq!(
            canonicalize_header("SUBJect", " AbC\r\n\t def  "),
            "subject:AbC def"
        );
    }

    #[test]
    fn signature_fields() {
        let header = signer().signature_header(MESSAGE).unwrap();

        assert!(header.starts_with("v=1; a=rsa-sha256; c=relaxed/relaxed; d=example.com; "));
        assert!(header.contains("s=feather;"));
        assert!(header.contains("h=from:to:subject:date;"));
        assert!(header.contains("bh="));
        assert!(!header.ends_with("b="), "signature must not be empty");
    }

    #[test]
    fn sign_and_verify() {
        let signer = signer();
        let signed = signer.sign(MESSAGE).unwrap();
        assert!(signed.starts_with("DKIM-Signature: "));

        // recompute the header hash the way a verifier would and check the
        // RSA signature with the public half
        let header = signer.signature_header(MESSAGE).unwrap();
        let (unsigned, b) = header.rsplit_once("; b=").unwrap();
        let unsigned = format!("{unsigned}; ");

        let (headers, _) = split_message(MESSAGE);
        let mut hasher = Sha256::new();
        for (name, value) in signer.select_headers(&headers) {
            hasher.update(canonicalize_header(name, value).as_bytes());
            hasher.update(b"\r\n");
        }
        hasher.update(
            canonicalize_header("DKIM-Signature", &format!("{unsigned}b=")).as_bytes(),
        );

        let digest = hasher.finalize();
        rsa::RsaPublicKey::from(&signer.private_key)
            .verify(
                rsa::PaddingScheme::PKCS1v15Sign {
                    hash: Some(rsa::hash::Hash::SHA2_256),
                },
                digest.as_slice(),
                &base64::decode(b).unwrap(),
            )
            .unwrap();
    }

    #[test]
    fn missing_headers_are_skipped() {
        let raw = "From: a@b.c\r\n\r\nbody\r\n";
        let header = signer().signature_header(raw).unwrap();
        assert!(header.contains("h=from;"));
    }
}
