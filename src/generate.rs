//! Generator boundary
//!
//! The real per-application template generators (Nagios, NagVis, ...) are
//! external collaborators; the pipeline only needs the `Generator`
//! contract. `FileTreeGenerator` is the built-in implementation that
//! materialises the ventilation result under `<base>/<server>/` so the
//! deploy phase has a tree to ship.

use crate::error::{VentError, VentResult};
use crate::models::VentilationResult;
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

/// Writes per-server configuration trees from a ventilation result
pub trait Generator {
    fn generate(&self, ventilation: &VentilationResult) -> VentResult<()>;
}

/// Built-in generator: one directory per server, with a `ventilation.csv`
/// listing every (host, application) pair the server is responsible for
pub struct FileTreeGenerator {
    base_dir: PathBuf,
}

impl FileTreeGenerator {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

impl Generator for FileTreeGenerator {
    fn generate(&self, ventilation: &VentilationResult) -> VentResult<()> {
        // refuse before touching anything: an empty ventilation must not
        // wipe the previously generated trees
        if ventilation.is_empty() {
            return Err(VentError::Dispatch(
                "generation produced no server tree (empty ventilation)".to_string(),
            ));
        }

        // stale server trees from a previous topology must not be shipped
        if self.base_dir.exists() {
            std::fs::remove_dir_all(&self.base_dir)?;
        }
        std::fs::create_dir_all(&self.base_dir)?;

        for server in ventilation.all_servers() {
            let server_dir = self.base_dir.join(&server);
            std::fs::create_dir_all(&server_dir)?;
            let mut file = std::fs::File::create(server_dir.join("ventilation.csv"))?;
            for (host, apps) in ventilation.entries() {
                for (app, servers) in apps {
                    if let Some(position) = servers.iter().position(|s| s == &server) {
                        let role = if position == 0 { "nominal" } else { "backup" };
                        writeln!(file, "{host};{app};{role}")?;
                    }
                }
            }
            debug!(server = %server, "generated configuration tree");
        }
        Ok(())
    }
}
