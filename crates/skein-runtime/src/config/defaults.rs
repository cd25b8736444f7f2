//! Compile-time defaults, merged by build.rs from library defaults and
//! the optional `SKEIN_CONFIG_RS` file.

include!(concat!(env!("OUT_DIR"), "/skein_merged_config.rs"));
