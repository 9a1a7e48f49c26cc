//! Built-in per-`build_system` command recipes (spec §4.7, "Built-in
//! recipes include `dummy`... and `autotools`...").

use morph_types::BuildSystem;

pub fn configure_commands(build_system: BuildSystem) -> Vec<String> {
    match build_system {
        BuildSystem::Dummy => vec!["echo dummy: configure".to_string()],
        BuildSystem::Autotools => vec![
            "if [ -x ./autogen.sh ]; then ./autogen.sh; elif [ ! -e ./configure ]; then autoreconf -ivf; fi".to_string(),
            "./configure --prefix=/usr".to_string(),
        ],
    }
}

pub fn build_commands(build_system: BuildSystem) -> Vec<String> {
    match build_system {
        BuildSystem::Dummy => vec!["echo dummy: build".to_string()],
        BuildSystem::Autotools => vec!["make".to_string()],
    }
}

pub fn test_commands(build_system: BuildSystem) -> Vec<String> {
    match build_system {
        BuildSystem::Dummy => vec!["echo dummy: test".to_string()],
        BuildSystem::Autotools => vec![],
    }
}

pub fn install_commands(build_system: BuildSystem) -> Vec<String> {
    match build_system {
        BuildSystem::Dummy => vec!["echo dummy: install".to_string()],
        BuildSystem::Autotools => vec!["make DESTDIR=\"$DESTDIR\" install".to_string()],
    }
}
