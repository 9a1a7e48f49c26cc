/// The built-in build-system recipes a chunk may request instead of (or in
/// addition to) explicit per-stage commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildSystem {
    /// Echoes placeholder text for each stage; used for smoke-testing the
    /// engine itself.
    Dummy,
    /// `./autogen.sh` (or `autoreconf -ivf` if there's no `configure` yet)
    /// → `./configure --prefix=/usr` → `make` → (no test) →
    /// `make DESTDIR="$DESTDIR" install`.
    Autotools,
}

/// One ordered `name -> patterns` entry of a chunk morphology's `chunks`
/// mapping. Kept as a `Vec` (not a map) because declaration order is
/// observable: it is the order chunks are created and archived in.
pub type ChunkSplit = (String, Vec<String>);

/// `kind: chunk` — the smallest buildable unit.
#[derive(Debug, Clone)]
pub struct ChunkMorphology {
    pub name: String,
    pub description: String,
    pub build_system: Option<BuildSystem>,
    pub configure_commands: Option<Vec<String>>,
    pub build_commands: Option<Vec<String>>,
    pub test_commands: Option<Vec<String>>,
    pub install_commands: Option<Vec<String>>,
    pub max_jobs: Option<u32>,
    /// `None` means "a single chunk named after the morphology that matches
    /// everything" (i.e. `[(name, vec![".*".into()])]` when resolved).
    pub chunks: Option<Vec<ChunkSplit>>,
}

impl ChunkMorphology {
    /// Resolve the `chunks` mapping, applying the "absent means one chunk
    /// matching everything" default.
    pub fn resolved_chunks(&self) -> Vec<ChunkSplit> {
        self.chunks.clone().unwrap_or_else(|| {
            vec![(self.name.clone(), vec![".*".to_string()])]
        })
    }
}

/// One entry of a stratum's `sources` list.
#[derive(Debug, Clone)]
pub struct StratumSource {
    pub repo: String,
    pub git_ref: String,
    /// Morphology file name, if it differs from `{name}.morph`.
    pub morph: Option<String>,
    pub name: String,
}

impl StratumSource {
    /// The morphology filename to load for this source.
    pub fn morph_filename(&self) -> String {
        format!("{}.morph", self.morph.as_deref().unwrap_or(&self.name))
    }
}

/// `kind: stratum` — an ordered aggregate of chunks.
#[derive(Debug, Clone)]
pub struct StratumMorphology {
    pub name: String,
    pub description: String,
    pub sources: Vec<StratumSource>,
    pub build_depends: Option<Vec<String>>,
}

/// `kind: system` — a bootable aggregate of strata.
#[derive(Debug, Clone)]
pub struct SystemMorphology {
    pub name: String,
    pub description: String,
    pub strata: Vec<String>,
    /// Accepted directly by the disk-image tool (e.g. `"1G"`).
    pub disk_size: String,
}

/// The tagged variant a [`crate::treeish::MorphLoader`] returns: exactly one
/// of the three morphology kinds. Declaring any other `kind` is a fatal
/// configuration error, enforced at the call site that matches on this enum.
#[derive(Debug, Clone)]
pub enum Morphology {
    Chunk(ChunkMorphology),
    Stratum(StratumMorphology),
    System(SystemMorphology),
}

impl Morphology {
    pub fn name(&self) -> &str {
        match self {
            Morphology::Chunk(c) => &c.name,
            Morphology::Stratum(s) => &s.name,
            Morphology::System(s) => &s.name,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Morphology::Chunk(c) => &c.description,
            Morphology::Stratum(s) => &s.description,
            Morphology::System(s) => &s.description,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Morphology::Chunk(_) => "chunk",
            Morphology::Stratum(_) => "stratum",
            Morphology::System(_) => "system",
        }
    }
}
