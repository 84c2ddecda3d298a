//! Registry of the demo modules the toolkit can run.
//!
//! The modules themselves are Python scripts executed inside the sandbox;
//! this registry only maps CLI keys to the `--functions` selector the demo
//! script understands.

/// One runnable demo module.
#[derive(Clone, Copy, Debug)]
pub struct ModuleSpec {
    pub key: &'static str,
    pub description: &'static str,
}

/// All demo modules, in presentation order.
pub const MODULES: &[ModuleSpec] = &[
    ModuleSpec {
        key: "basic",
        description: "Basic Data Structures",
    },
    ModuleSpec {
        key: "advanced",
        description: "Advanced Data Structures",
    },
    ModuleSpec {
        key: "csv",
        description: "CSV Module",
    },
    ModuleSpec {
        key: "pandas",
        description: "Pandas Module",
    },
    ModuleSpec {
        key: "database",
        description: "Database Operations",
    },
    ModuleSpec {
        key: "challenges",
        description: "Programming Challenges",
    },
    ModuleSpec {
        key: "challenges_2",
        description: "Programming Challenges II",
    },
];

pub fn find(key: &str) -> Option<&'static ModuleSpec> {
    MODULES.iter().find(|m| m.key == key)
}

/// Resolve the requested module keys, or all modules when none are given.
/// Unknown keys are an error naming the available ones.
pub fn select(keys: &[String]) -> anyhow::Result<Vec<&'static ModuleSpec>> {
    if keys.is_empty() {
        return Ok(MODULES.iter().collect());
    }
    keys.iter()
        .map(|key| {
            find(key).ok_or_else(|| {
                let available: Vec<&str> = MODULES.iter().map(|m| m.key).collect();
                anyhow::anyhow!(
                    "unknown module '{key}'; available modules: {}",
                    available.join(", ")
                )
            })
        })
        .collect()
}
