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

//! Matter secure channel core
//!
//! Passcode-authenticated session establishment (PASE, SPAKE2+ over P-256),
//! the per-exchange reliable messaging state (MRP), AES-CCM message framing
//! and a UDP binding that ties them together.
//!
//! # Examples
//! ```
//! use rs_matter_sc::sc::pase::{PaseConfig, PaseMgr};
//! use rs_matter_sc::utils::epoch::sys_epoch;
//! use rs_matter_sc::utils::rand::sys_rand;
//!
//! let mut pase = PaseMgr::new(PaseConfig::new(), sys_epoch, sys_rand);
//! pase.enable_basic_pase_session(20202021).unwrap();
//! ```

#![allow(async_fn_in_trait)]

pub mod crypto;
pub mod error;
pub mod sc;
pub mod tlv;
pub mod transport;
pub mod utils;
