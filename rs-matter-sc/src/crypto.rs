/*
 *
 *    Copyright (c) 2020-2022 Project CHIP Authors
 *
 *    Licensed under the Apache License, Version 2.0 (the "License");
 *    you may not use this file except in compliance with the License.
 *    You may obtain a copy of the License at
 *
 *        http://www.apache.org/licenses/LICENSE-2.0
 *
 *    Unless required by applicable law or agreed to in writing, software
 *    distributed under the License is distributed on an "AS IS" BASIS,
 *    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *    See the License for the specific language governing permissions and
 *    limitations under the License.
 */

//! Crypto primitives used by the secure channel, on top of RustCrypto.

use core::fmt;

use aes::Aes128;
use ccm::aead::generic_array::GenericArray;
use ccm::consts::{U13, U16};
use ccm::{AeadInPlace, Ccm, KeyInit};
use hmac::Mac;
use log::error;
use sha2::Digest;
use zeroize::Zeroize;

use crate::error::{Error, ErrorCode};

pub const SHA256_HASH_LEN_BYTES: usize = 32;
pub const AEAD_KEY_LEN_BYTES: usize = 16;
pub const AEAD_NONCE_LEN_BYTES: usize = 13;
pub const AEAD_MIC_LEN_BYTES: usize = 16;

type HmacSha256I = hmac::Hmac<sha2::Sha256>;
type AesCcm = Ccm<Aes128, U16, U13>;

#[derive(Clone)]
pub struct Sha256 {
    hasher: sha2::Sha256,
}

impl Sha256 {
    pub fn new() -> Self {
        Self {
            hasher: sha2::Sha256::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finish(self) -> [u8; SHA256_HASH_LEN_BYTES] {
        self.hasher.finalize().into()
    }
}

impl Default for Sha256 {
    fn default() -> Self {
        Self::new()
    }
}

pub struct HmacSha256 {
    inner: HmacSha256I,
}

impl HmacSha256 {
    pub fn new(key: &[u8]) -> Result<Self, Error> {
        Ok(Self {
            inner: <HmacSha256I as Mac>::new_from_slice(key).map_err(|e| {
                error!("Error creating HmacSha256 {:?}", e);
                Error::from(e)
            })?,
        })
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finish(self) -> [u8; SHA256_HASH_LEN_BYTES] {
        self.inner.finalize().into_bytes().into()
    }
}

pub fn pbkdf2_hmac(pass: &[u8], iter: u32, salt: &[u8], key: &mut [u8]) {
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(pass, salt, iter, key);
}

pub fn hkdf_sha256(salt: &[u8], ikm: &[u8], info: &[u8], key: &mut [u8]) -> Result<(), Error> {
    hkdf::Hkdf::<sha2::Sha256>::new(Some(salt), ikm)
        .expand(info, key)
        .map_err(|e| {
            error!("Error with hkdf_sha256 {:?}", e);
            e.into()
        })
}

/// Encrypts `data` in place and returns the detached tag.
pub fn encrypt_in_place(
    key: &[u8],
    nonce: &[u8],
    ad: &[u8],
    data: &mut [u8],
) -> Result<[u8; AEAD_MIC_LEN_BYTES], Error> {
    if key.len() != AEAD_KEY_LEN_BYTES || nonce.len() != AEAD_NONCE_LEN_BYTES {
        Err(ErrorCode::Crypto)?;
    }

    let cipher = AesCcm::new(GenericArray::from_slice(key));
    let tag = cipher.encrypt_in_place_detached(GenericArray::from_slice(nonce), ad, data)?;

    Ok(tag.into())
}

/// Verifies `tag` and decrypts `data` in place. The contents of `data`
/// are unspecified after a tag mismatch.
pub fn decrypt_in_place(
    key: &[u8],
    nonce: &[u8],
    ad: &[u8],
    data: &mut [u8],
    tag: &[u8],
) -> Result<(), Error> {
    if key.len() != AEAD_KEY_LEN_BYTES
        || nonce.len() != AEAD_NONCE_LEN_BYTES
        || tag.len() != AEAD_MIC_LEN_BYTES
    {
        Err(ErrorCode::Crypto)?;
    }

    let cipher = AesCcm::new(GenericArray::from_slice(key));
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            ad,
            data,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| ErrorCode::AuthenticationFailure.into())
}

/// Fixed-size secret material. Zeroed on drop and never printed.
#[derive(Clone)]
pub struct CryptoSensitive<const N: usize>([u8; N]);

impl<const N: usize> CryptoSensitive<N> {
    pub const fn new() -> Self {
        Self([0; N])
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, Error> {
        let mut this = Self::new();
        if data.len() != N {
            Err(ErrorCode::Invalid)?;
        }
        this.0.copy_from_slice(data);

        Ok(this)
    }

    pub fn access(&self) -> &[u8; N] {
        &self.0
    }

    pub fn access_mut(&mut self) -> &mut [u8; N] {
        &mut self.0
    }

    pub fn clear(&mut self) {
        self.0.zeroize();
    }
}

impl<const N: usize> Default for CryptoSensitive<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Drop for CryptoSensitive<N> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<const N: usize> PartialEq for CryptoSensitive<N> {
    fn eq(&self, other: &Self) -> bool {
        use subtle::ConstantTimeEq;

        self.0.ct_eq(&other.0).into()
    }
}

impl<const N: usize> Eq for CryptoSensitive<N> {}

impl<const N: usize> fmt::Debug for CryptoSensitive<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CryptoSensitive<{}>(***)", N)
    }
}

pub type AeadKey = CryptoSensitive<AEAD_KEY_LEN_BYTES>;
