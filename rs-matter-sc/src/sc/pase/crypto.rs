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

//! SPAKE2+ group operations over P-256 with the Matter M and N points.

use p256::elliptic_curve::bigint::U256;
use p256::elliptic_curve::ops::Reduce;
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::elliptic_curve::PrimeField;
use p256::{AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar};

use crate::crypto::Sha256;
use crate::error::{Error, ErrorCode};
use crate::utils::rand::Rand;

pub const SPAKE2P_SCALAR_LEN: usize = 32;
pub const SPAKE2P_WS_LEN: usize = 40;
pub const SPAKE2P_POINT_LEN: usize = 65;

const MATTER_M_BIN: [u8; SPAKE2P_POINT_LEN] = [
    0x04, 0x88, 0x6e, 0x2f, 0x97, 0xac, 0xe4, 0x6e, 0x55, 0xba, 0x9d, 0xd7, 0x24, 0x25, 0x79, 0xf2,
    0x99, 0x3b, 0x64, 0xe1, 0x6e, 0xf3, 0xdc, 0xab, 0x95, 0xaf, 0xd4, 0x97, 0x33, 0x3d, 0x8f, 0xa1,
    0x2f, 0x5f, 0xf3, 0x55, 0x16, 0x3e, 0x43, 0xce, 0x22, 0x4e, 0x0b, 0x0e, 0x65, 0xff, 0x02, 0xac,
    0x8e, 0x5c, 0x7b, 0xe0, 0x94, 0x19, 0xc7, 0x85, 0xe0, 0xca, 0x54, 0x7d, 0x55, 0xa1, 0x2e, 0x2d,
    0x20,
];
const MATTER_N_BIN: [u8; SPAKE2P_POINT_LEN] = [
    0x04, 0xd8, 0xbb, 0xd6, 0xc6, 0x39, 0xc6, 0x29, 0x37, 0xb0, 0x4d, 0x99, 0x7f, 0x38, 0xc3, 0x77,
    0x07, 0x19, 0xc6, 0x29, 0xd7, 0x01, 0x4d, 0x49, 0xa2, 0x4b, 0x4f, 0x98, 0xba, 0xa1, 0x29, 0x2b,
    0x49, 0x07, 0xd6, 0x0a, 0xa6, 0xbf, 0xad, 0xe4, 0x50, 0x08, 0xa6, 0x36, 0x33, 0x7f, 0x51, 0x68,
    0xc6, 0x4d, 0x9b, 0xd3, 0x60, 0x34, 0x80, 0x8c, 0xd5, 0x64, 0x49, 0x0b, 0x1e, 0x65, 0x6e, 0xdb,
    0xe7,
];

#[allow(non_snake_case)]
pub struct CryptoSpake2 {
    xy: Scalar,
    w0: Scalar,
    w1: Scalar,
    M: AffinePoint,
    N: AffinePoint,
    L: AffinePoint,
}

impl CryptoSpake2 {
    #[allow(non_snake_case)]
    pub fn new() -> Result<Self, Error> {
        let M = decode_point(&MATTER_M_BIN).map_err(|_| ErrorCode::Crypto)?;
        let N = decode_point(&MATTER_N_BIN).map_err(|_| ErrorCode::Crypto)?;

        Ok(Self {
            xy: Scalar::ZERO,
            w0: Scalar::ZERO,
            w1: Scalar::ZERO,
            M,
            N,
            L: AffinePoint::IDENTITY,
        })
    }

    // From the Matter Spec,
    //         w0 = w0s mod p
    //   where p is the order of the curve
    pub fn set_w0_from_w0s(&mut self, w0s: &[u8]) -> Result<(), Error> {
        self.w0 = reduce_wide(w0s)?;
        Ok(())
    }

    pub fn set_w1_from_w1s(&mut self, w1s: &[u8]) -> Result<(), Error> {
        self.w1 = reduce_wide(w1s)?;
        Ok(())
    }

    /// Loads an already reduced w0, as stored in a verifier.
    pub fn set_w0(&mut self, w0: &[u8]) -> Result<(), Error> {
        if w0.len() != SPAKE2P_SCALAR_LEN {
            Err(ErrorCode::Invalid)?;
        }

        self.w0 = Option::<Scalar>::from(Scalar::from_repr(*FieldBytes::from_slice(w0)))
            .ok_or(ErrorCode::ParameterOutOfRange)?;

        Ok(())
    }

    #[allow(non_snake_case)]
    pub fn set_L(&mut self, l: &[u8]) -> Result<(), Error> {
        self.L = decode_point(l).map_err(|_| ErrorCode::ParameterOutOfRange)?;
        Ok(())
    }

    // From the Matter spec,
    //        L = w1 * P
    //    where P is the generator of the underlying elliptic curve
    #[allow(non_snake_case)]
    pub fn set_L_from_w1s(&mut self, w1s: &[u8]) -> Result<(), Error> {
        self.set_w1_from_w1s(w1s)?;
        self.L = (ProjectivePoint::GENERATOR * self.w1).to_affine();
        Ok(())
    }

    /// The verifier half of the commissioning secret: w0 followed by L.
    #[allow(non_snake_case)]
    pub fn w0_and_L(&self, out: &mut [u8]) -> Result<(), Error> {
        if out.len() != SPAKE2P_SCALAR_LEN + SPAKE2P_POINT_LEN {
            Err(ErrorCode::NoSpace)?;
        }

        out[..SPAKE2P_SCALAR_LEN].copy_from_slice(&self.w0.to_repr());
        encode_point(&ProjectivePoint::from(self.L), &mut out[SPAKE2P_SCALAR_LEN..])
    }

    // X = x*P + w0*M
    #[allow(non_snake_case)]
    pub fn get_pA(&mut self, rand: Rand) -> Result<[u8; SPAKE2P_POINT_LEN], Error> {
        self.xy = random_scalar(rand)?;

        let X = ProjectivePoint::GENERATOR * self.xy + ProjectivePoint::from(self.M) * self.w0;

        let mut pA = [0; SPAKE2P_POINT_LEN];
        encode_point(&X, &mut pA)?;
        Ok(pA)
    }

    // Y = y*P + w0*N
    #[allow(non_snake_case)]
    pub fn get_pB(&mut self, rand: Rand) -> Result<[u8; SPAKE2P_POINT_LEN], Error> {
        self.xy = random_scalar(rand)?;

        let Y = ProjectivePoint::GENERATOR * self.xy + ProjectivePoint::from(self.N) * self.w0;

        let mut pB = [0; SPAKE2P_POINT_LEN];
        encode_point(&Y, &mut pB)?;
        Ok(pB)
    }

    /// Transcript hash on the commissioner side. `pB` comes from the peer.
    #[allow(non_snake_case)]
    pub fn get_TT_as_prover(
        &self,
        context: &[u8],
        pA: &[u8],
        pB: &[u8],
    ) -> Result<[u8; 32], Error> {
        let Y = decode_point(pB)?;

        // Z = x*(Y - w0*N)
        // V = w1*(Y - w0*N)
        // The P-256 cofactor is 1
        let base = ProjectivePoint::from(Y) - ProjectivePoint::from(self.N) * self.w0;
        let Z = base * self.xy;
        let V = base * self.w1;

        self.finish_tt(context, pA, pB, &Z, &V)
    }

    /// Transcript hash on the commissionee side. `pA` comes from the peer.
    #[allow(non_snake_case)]
    pub fn get_TT_as_verifier(
        &self,
        context: &[u8],
        pA: &[u8],
        pB: &[u8],
    ) -> Result<[u8; 32], Error> {
        let X = decode_point(pA)?;

        // Z = y*(X - w0*M)
        // V = y*L
        let Z = (ProjectivePoint::from(X) - ProjectivePoint::from(self.M) * self.w0) * self.xy;
        let V = ProjectivePoint::from(self.L) * self.xy;

        self.finish_tt(context, pA, pB, &Z, &V)
    }

    #[allow(non_snake_case)]
    fn finish_tt(
        &self,
        context: &[u8],
        pA: &[u8],
        pB: &[u8],
        Z: &ProjectivePoint,
        V: &ProjectivePoint,
    ) -> Result<[u8; 32], Error> {
        let mut z = [0; SPAKE2P_POINT_LEN];
        encode_point(Z, &mut z)?;
        let mut v = [0; SPAKE2P_POINT_LEN];
        encode_point(V, &mut v)?;

        let mut tt = Sha256::new();
        add_to_tt(&mut tt, context);
        // 2 empty identifiers
        add_to_tt(&mut tt, &[]);
        add_to_tt(&mut tt, &[]);
        add_to_tt(&mut tt, &MATTER_M_BIN);
        add_to_tt(&mut tt, &MATTER_N_BIN);
        add_to_tt(&mut tt, pA);
        add_to_tt(&mut tt, pB);
        add_to_tt(&mut tt, &z);
        add_to_tt(&mut tt, &v);
        add_to_tt(&mut tt, &self.w0.to_repr());

        Ok(tt.finish())
    }
}

impl Drop for CryptoSpake2 {
    fn drop(&mut self) {
        self.xy = Scalar::ZERO;
        self.w0 = Scalar::ZERO;
        self.w1 = Scalar::ZERO;
    }
}

fn add_to_tt(tt: &mut Sha256, buf: &[u8]) {
    tt.update(&(buf.len() as u64).to_le_bytes());
    if !buf.is_empty() {
        tt.update(buf);
    }
}

/// Reduces a 40-byte big-endian integer modulo the group order.
fn reduce_wide(ws: &[u8]) -> Result<Scalar, Error> {
    if ws.len() != SPAKE2P_WS_LEN {
        Err(ErrorCode::Invalid)?;
    }

    let mut hi = [0; 8];
    hi.copy_from_slice(&ws[..8]);
    let hi = Scalar::from(u64::from_be_bytes(hi));
    let lo = <Scalar as Reduce<U256>>::reduce_bytes(FieldBytes::from_slice(&ws[8..]));

    // ws = hi * 2^256 + lo
    let two_64 = Scalar::from(u64::MAX) + Scalar::ONE;
    let two_256 = two_64.square().square();

    Ok(hi * two_256 + lo)
}

fn random_scalar(rand: Rand) -> Result<Scalar, Error> {
    let mut buf = [0; SPAKE2P_WS_LEN];
    rand(&mut buf);

    let scalar = reduce_wide(&buf);
    buf.fill(0);

    scalar
}

/// Decodes an uncompressed SEC1 point. The identity and points off the
/// curve are rejected.
fn decode_point(data: &[u8]) -> Result<AffinePoint, Error> {
    if data.len() != SPAKE2P_POINT_LEN || data[0] != 0x04 {
        Err(ErrorCode::InvalidKeyConfirmation)?;
    }

    let point = EncodedPoint::from_bytes(data).map_err(|_| ErrorCode::InvalidKeyConfirmation)?;

    Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&point))
        .ok_or_else(|| ErrorCode::InvalidKeyConfirmation.into())
}

fn encode_point(point: &ProjectivePoint, out: &mut [u8]) -> Result<(), Error> {
    let encoded = point.to_affine().to_encoded_point(false);
    let bytes = encoded.as_bytes();

    // The identity has a one-byte encoding
    if bytes.len() != SPAKE2P_POINT_LEN || out.len() != SPAKE2P_POINT_LEN {
        Err(ErrorCode::Crypto)?;
    }

    out.copy_from_slice(bytes);
    Ok(())
}
