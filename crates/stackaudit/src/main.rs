// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

mod adapters;
mod cli;
mod dispatch;
mod logging;

fn main() {
    std::process::exit(cli::run());
}
