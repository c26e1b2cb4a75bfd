//
// Copyright (c) The Ripd Contributors
//
// SPDX-License-Identifier: MIT
//

#![cfg_attr(
    feature = "testing",
    allow(dead_code, unused_variables, unused_imports)
)]

pub mod admin;
pub mod debug;
pub mod error;
pub mod events;
pub mod instance;
pub mod interface;
pub mod network;
pub mod output;
pub mod packet;
pub mod route;
pub mod southbound;
pub mod tasks;
