// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;

const UNKNOWN_HOSTNAME: &str = "unknown";

/// The name stamped as `host.name` on every entry: `LP_HOSTNAME`, then
/// `HOSTNAME`, then the system hostname.
pub fn resolve() -> String {
    env::var("LP_HOSTNAME")
        .ok()
        .filter(|name| !name.is_empty())
        .or_else(|| env::var("HOSTNAME").ok().filter(|name| !name.is_empty()))
        .or_else(system_hostname)
        .unwrap_or_else(|| UNKNOWN_HOSTNAME.to_string())
}

fn system_hostname() -> Option<String> {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
}
