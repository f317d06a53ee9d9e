// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Operators that reshape entries and pass them on.

pub mod add;
pub mod remove;
pub mod retain;
