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

use core::fmt;

use log::{debug, error};
use subtle::ConstantTimeEq;

use crate::crypto::{self, pbkdf2_hmac, CryptoSensitive, HmacSha256, Sha256};
use crate::error::{Error, ErrorCode};
use crate::utils::rand::Rand;

use super::crypto::{CryptoSpake2, SPAKE2P_POINT_LEN, SPAKE2P_SCALAR_LEN, SPAKE2P_WS_LEN};

// This file handles the Spake2+ exchange on top of the group operations in
// `CryptoSpake2`: the context hash, w0/w1 derivation from the passcode and
// the key confirmation.
//
// Ke is only released once the peer's confirmation MAC has been checked.

pub const SPAKE2_ITERATION_COUNT: u32 = 2000;
pub const MAX_SALT_SIZE_BYTES: usize = 32;
pub const VERIFIER_SIZE_BYTES: usize = SPAKE2P_SCALAR_LEN + SPAKE2P_POINT_LEN;
pub const PAKE_CONFIRMATION_LEN: usize = 32;
pub const KE_LEN: usize = 16;

const SPAKE2P_KEY_CONFIRM_INFO: &[u8] = b"ConfirmationKeys";
const SPAKE2P_CONTEXT_PREFIX: &[u8] = b"CHIP PAKE V1 Commissioning";

#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Spake2VerifierState {
    // Initialised - w0, L are set
    Init,
    // Pending Confirmation - Keys are derived but pending confirmation
    PendingConfirmation,
    // Confirmed
    Confirmed,
}

#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Spake2ProverState {
    // Initialised - w0, w1 are set
    Init,
    // pA is out, waiting for pB and cB
    PendingPeerShare,
    // cB checked
    Confirmed,
}

#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Spake2Mode {
    Unknown,
    Prover(Spake2ProverState),
    Verifier(Spake2VerifierState),
}

#[allow(non_snake_case)]
pub struct Spake2P {
    mode: Spake2Mode,
    context: Option<Sha256>,
    Ke: CryptoSensitive<KE_LEN>,
    cA: [u8; PAKE_CONFIRMATION_LEN],
    pA: [u8; SPAKE2P_POINT_LEN],
    crypto_spake2: Option<CryptoSpake2>,
}

impl Spake2P {
    pub const fn new() -> Self {
        Self {
            mode: Spake2Mode::Unknown,
            context: None,
            Ke: CryptoSensitive::new(),
            cA: [0; PAKE_CONFIRMATION_LEN],
            pA: [0; SPAKE2P_POINT_LEN],
            crypto_spake2: None,
        }
    }

    pub fn mode(&self) -> Spake2Mode {
        self.mode
    }

    pub fn set_context(&mut self) {
        let mut context = Sha256::new();
        context.update(SPAKE2P_CONTEXT_PREFIX);
        self.context = Some(context);
    }

    pub fn update_context(&mut self, buf: &[u8]) -> Result<(), Error> {
        self.context
            .as_mut()
            .ok_or(ErrorCode::IncorrectState)?
            .update(buf);

        Ok(())
    }

    pub fn get_w0w1s(pw: u32, iter: u32, salt: &[u8]) -> CryptoSensitive<{ 2 * SPAKE2P_WS_LEN }> {
        let mut w0w1s = CryptoSensitive::new();
        pbkdf2_hmac(&pw.to_le_bytes(), iter, salt, w0w1s.access_mut());
        w0w1s
    }

    pub fn start_prover(&mut self, pw: u32, iter: u32, salt: &[u8]) -> Result<(), Error> {
        let w0w1s = Self::get_w0w1s(pw, iter, salt);
        let (w0s, w1s) = w0w1s.access().split_at(SPAKE2P_WS_LEN);

        let mut crypto_spake2 = CryptoSpake2::new()?;
        crypto_spake2.set_w0_from_w0s(w0s)?;
        crypto_spake2.set_w1_from_w1s(w1s)?;

        self.crypto_spake2 = Some(crypto_spake2);
        self.mode = Spake2Mode::Prover(Spake2ProverState::Init);
        Ok(())
    }

    #[allow(non_snake_case)]
    pub fn get_pA(&mut self, rand: Rand) -> Result<[u8; SPAKE2P_POINT_LEN], Error> {
        if self.mode != Spake2Mode::Prover(Spake2ProverState::Init) {
            Err(ErrorCode::IncorrectState)?;
        }

        let crypto_spake2 = self
            .crypto_spake2
            .as_mut()
            .ok_or(ErrorCode::IncorrectState)?;
        self.pA = crypto_spake2.get_pA(rand)?;

        self.mode = Spake2Mode::Prover(Spake2ProverState::PendingPeerShare);
        Ok(self.pA)
    }

    /// Checks the verifier's confirmation and returns ours.
    #[allow(non_snake_case)]
    pub fn handle_pB(&mut self, pB: &[u8], cB: &[u8]) -> Result<[u8; PAKE_CONFIRMATION_LEN], Error> {
        if self.mode != Spake2Mode::Prover(Spake2ProverState::PendingPeerShare) {
            Err(ErrorCode::IncorrectState)?;
        }

        // Whatever the outcome, the ephemeral secrets are not reused
        let crypto_spake2 = self
            .crypto_spake2
            .take()
            .ok_or(ErrorCode::IncorrectState)?;
        let context = self.context.take().ok_or(ErrorCode::IncorrectState)?;

        let TT = crypto_spake2.get_TT_as_prover(&context.finish(), &self.pA, pB)?;
        let (Ke, cA, cB_expected) = Self::get_Ke_and_cAcB(&TT, &self.pA, pB)?;

        if cB.ct_eq(&cB_expected).unwrap_u8() != 1 {
            error!("Peer key confirmation mismatch");
            Err(ErrorCode::InvalidKeyConfirmation)?;
        }

        self.Ke = Ke;
        self.cA = cA;
        self.mode = Spake2Mode::Prover(Spake2ProverState::Confirmed);

        Ok(cA)
    }

    pub fn start_verifier(&mut self, verifier: &VerifierData) -> Result<(), Error> {
        let (w0, l) = verifier.verifier.access().split_at(SPAKE2P_SCALAR_LEN);

        let mut crypto_spake2 = CryptoSpake2::new()?;
        crypto_spake2.set_w0(w0)?;
        crypto_spake2.set_L(l)?;

        self.crypto_spake2 = Some(crypto_spake2);
        self.mode = Spake2Mode::Verifier(Spake2VerifierState::Init);
        Ok(())
    }

    /// Returns pB and cB for the prover's share.
    #[allow(non_snake_case)]
    pub fn handle_pA(
        &mut self,
        pA: &[u8],
        rand: Rand,
    ) -> Result<([u8; SPAKE2P_POINT_LEN], [u8; PAKE_CONFIRMATION_LEN]), Error> {
        if self.mode != Spake2Mode::Verifier(Spake2VerifierState::Init) {
            Err(ErrorCode::IncorrectState)?;
        }

        let mut crypto_spake2 = self
            .crypto_spake2
            .take()
            .ok_or(ErrorCode::IncorrectState)?;
        let context = self.context.take().ok_or(ErrorCode::IncorrectState)?;

        let pB = crypto_spake2.get_pB(rand)?;
        let TT = crypto_spake2.get_TT_as_verifier(&context.finish(), pA, &pB)?;
        let (Ke, cA, cB) = Self::get_Ke_and_cAcB(&TT, pA, &pB)?;

        self.Ke = Ke;
        self.cA = cA;
        self.mode = Spake2Mode::Verifier(Spake2VerifierState::PendingConfirmation);

        Ok((pB, cB))
    }

    #[allow(non_snake_case)]
    pub fn handle_cA(&mut self, cA: &[u8]) -> Result<(), Error> {
        if self.mode != Spake2Mode::Verifier(Spake2VerifierState::PendingConfirmation) {
            Err(ErrorCode::IncorrectState)?;
        }

        if cA.ct_eq(&self.cA).unwrap_u8() != 1 {
            error!("Peer key confirmation mismatch");
            self.Ke.clear();
            self.mode = Spake2Mode::Unknown;
            Err(ErrorCode::InvalidKeyConfirmation)?;
        }

        self.mode = Spake2Mode::Verifier(Spake2VerifierState::Confirmed);
        Ok(())
    }

    /// The shared secret, available once the peer's confirmation checked out.
    pub fn ke(&self) -> Result<&CryptoSensitive<KE_LEN>, Error> {
        match self.mode {
            Spake2Mode::Prover(Spake2ProverState::Confirmed)
            | Spake2Mode::Verifier(Spake2VerifierState::Confirmed) => Ok(&self.Ke),
            _ => Err(ErrorCode::IncorrectState.into()),
        }
    }

    /// Drops every secret held so far.
    pub fn clear(&mut self) {
        self.crypto_spake2 = None;
        self.context = None;
        self.Ke.clear();
        self.cA.fill(0);
        self.mode = Spake2Mode::Unknown;
    }

    #[allow(non_snake_case)]
    fn get_Ke_and_cAcB(
        TT: &[u8; 32],
        pA: &[u8],
        pB: &[u8],
    ) -> Result<
        (
            CryptoSensitive<KE_LEN>,
            [u8; PAKE_CONFIRMATION_LEN],
            [u8; PAKE_CONFIRMATION_LEN],
        ),
        Error,
    > {
        // Step 1: Ka || Ke = Hash(TT)
        let (Ka, Ke) = TT.split_at(TT.len() / 2);
        let Ke = CryptoSensitive::from_slice(Ke)?;

        // Step 2: KcA || KcB = KDF(nil, Ka, "ConfirmationKeys")
        let mut KcAKcB = CryptoSensitive::<32>::new();
        crypto::hkdf_sha256(&[], Ka, SPAKE2P_KEY_CONFIRM_INFO, KcAKcB.access_mut())?;
        let (KcA, KcB) = KcAKcB.access().split_at(16);

        // Step 3: cA = HMAC(KcA, pB), cB = HMAC(KcB, pA)
        let mut mac = HmacSha256::new(KcA)?;
        mac.update(pB);
        let cA = mac.finish();

        let mut mac = HmacSha256::new(KcB)?;
        mac.update(pA);
        let cB = mac.finish();

        Ok((Ke, cA, cB))
    }
}

impl Default for Spake2P {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Spake2P {
    fn drop(&mut self) {
        self.cA.fill(0);
    }
}

/// The commissionee side of the secret: w0 || L, plus the PBKDF2 inputs
/// advertised to the commissioner.
#[derive(Clone)]
pub struct VerifierData {
    pub verifier: CryptoSensitive<VERIFIER_SIZE_BYTES>,
    pub salt: heapless::Vec<u8, MAX_SALT_SIZE_BYTES>,
    pub count: u32,
}

impl VerifierData {
    /// Derives a verifier from the setup passcode with a fresh random salt.
    pub fn new_with_pw(pw: u32, rand: Rand) -> Result<Self, Error> {
        let mut salt = [0; MAX_SALT_SIZE_BYTES];
        rand(&mut salt);

        Self::new_with_pw_and_salt(pw, &salt, SPAKE2_ITERATION_COUNT)
    }

    pub fn new_with_pw_and_salt(pw: u32, salt: &[u8], count: u32) -> Result<Self, Error> {
        let verifier = Self::compute_verifier(pw, count, salt)?;
        Self::from_parts(verifier, salt, count)
    }

    /// Wraps a verifier computed offline, e.g. during manufacturing.
    pub fn new(verifier: &[u8], salt: &[u8], count: u32) -> Result<Self, Error> {
        if verifier.len() != VERIFIER_SIZE_BYTES {
            Err(ErrorCode::InvalidData)?;
        }

        Self::from_parts(CryptoSensitive::from_slice(verifier)?, salt, count)
    }

    pub fn compute_verifier(
        pw: u32,
        count: u32,
        salt: &[u8],
    ) -> Result<CryptoSensitive<VERIFIER_SIZE_BYTES>, Error> {
        if count == 0 || salt.is_empty() || salt.len() > MAX_SALT_SIZE_BYTES {
            Err(ErrorCode::ParameterOutOfRange)?;
        }

        let w0w1s = Spake2P::get_w0w1s(pw, count, salt);
        let (w0s, w1s) = w0w1s.access().split_at(SPAKE2P_WS_LEN);

        let mut crypto_spake2 = CryptoSpake2::new()?;
        crypto_spake2.set_w0_from_w0s(w0s)?;
        crypto_spake2.set_L_from_w1s(w1s)?;

        let mut verifier = CryptoSensitive::new();
        crypto_spake2.w0_and_L(verifier.access_mut())?;

        debug!("Computed verifier over {} PBKDF2 iterations", count);

        Ok(verifier)
    }

    fn from_parts(
        verifier: CryptoSensitive<VERIFIER_SIZE_BYTES>,
        salt: &[u8],
        count: u32,
    ) -> Result<Self, Error> {
        Ok(Self {
            verifier,
            salt: heapless::Vec::from_slice(salt).map_err(|_| ErrorCode::ParameterOutOfRange)?,
            count,
        })
    }
}

impl fmt::Debug for VerifierData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifierData")
            .field("salt_len", &self.salt.len())
            .field("count", &self.count)
            .finish_non_exhaustive()
    }
}
