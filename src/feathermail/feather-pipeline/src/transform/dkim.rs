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

use super::Transformer;
use feather_auth::{DkimParams, DkimSigner};
use feather_common::Meta;

/// DKIM-signs the outgoing message (`rsa-sha256`, `relaxed/relaxed`).
#[derive(Debug)]
pub struct DkimSign {
    signer: DkimSigner,
}

impl DkimSign {
    /// Load the private key from a PEM file (PKCS#8, falling back to
    /// PKCS#1).
    ///
    /// # Errors
    ///
    /// * the key file is unreadable or not an RSA private key
    pub fn from_pem_file(
        selector: String,
        domain: String,
        headers: Vec<String>,
        private_key: &std::path::Path,
    ) -> anyhow::Result<Self> {
        let pem = std::fs::read_to_string(private_key).map_err(|error| {
            anyhow::anyhow!("cannot read dkim key '{}': {error}", private_key.display())
        })?;

        let key = <rsa::RsaPrivateKey as rsa::pkcs8::DecodePrivateKey>::from_pkcs8_pem(&pem)
            .or_else(|_| {
                <rsa::RsaPrivateKey as rsa::pkcs1::DecodeRsaPrivateKey>::from_pkcs1_pem(&pem)
            })
            .map_err(|error| anyhow::anyhow!("invalid dkim key: {error}"))?;

        Ok(Self {
            signer: DkimSigner::new(
                DkimParams {
                    selector,
                    sdid: domain,
                    headers,
                },
                key,
            ),
        })
    }
}

impl Transformer for DkimSign {
    fn kind(&self) -> &'static str {
        "dkim_signer"
    }

    fn transform_data(&mut self, raw: &mut Vec<u8>, _meta: &mut Meta) -> anyhow::Result<()> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| anyhow::anyhow!("cannot sign a non-utf8 message"))?;
        *raw = self.signer.sign(text)?.into_bytes();
        Ok(())
    }
}
