// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Build-time kernel configuration.
//!
//! The constants in this module are generated by `build.rs` from the RON
//! document in `SPRINTER_KCONFIG` (or the defaults in `abi::KernelConfig`, if
//! that variable is unset). For example:
//!
//! ```text
//! SPRINTER_KCONFIG='(max_tasks: 8, beta: 5)' cargo build
//! ```

include!(concat!(env!("OUT_DIR"), "/kconfig.rs"));
