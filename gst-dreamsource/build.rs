//! Build script for gst-dreamsource.
//!
//! Generates `COMMIT_ID` and `BUILD_REL_DATE` for `gst::plugin_define!`.

// SPDX-FileCopyrightText: 2025 Contributors to the dreamsource project.
// SPDX-License-Identifier: Apache-2.0

fn main() {
    gst_plugin_version_helper::info()
}
