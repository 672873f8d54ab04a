/*
 * SPDX-FileCopyrightText: 2023-2026 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

pub mod algorithm;
pub mod attribute;
pub mod cms;
pub mod tsp;
