use crate::{PoolError, Result, StatfilePool};
use config::{ClassifierConfig, StatfileConfig};
use statfile::Statfile;
use std::sync::Arc;
use tracing::{debug, info};

impl StatfilePool {
    /// Resolves `symbol` in `classifier` to an open statfile.
    ///
    /// Returns the pool's handle if the configured path is already open;
    /// otherwise opens it with the configured size (which may migrate it).
    /// When opening fails and `try_create` is set, a fresh file is created
    /// and opened. Fatal errors (a full pool or a leftover migration backup)
    /// are never answered by creating a file.
    ///
    /// The matched [`StatfileConfig`] is returned alongside the handle.
    pub fn get_statfile_by_symbol<'c>(
        &self,
        classifier: &'c ClassifierConfig,
        symbol: &str,
        try_create: bool,
    ) -> Result<(Arc<Statfile>, &'c StatfileConfig)> {
        let Some(st_cfg) = classifier.statfile(symbol) else {
            info!(classifier = %classifier.name, symbol, "cannot find statfile with this symbol");
            return Err(PoolError::UnknownSymbol {
                classifier: classifier.name.clone(),
                symbol: symbol.to_string(),
            });
        };

        if let Some(st) = self.is_open(&st_cfg.path) {
            return Ok((st, st_cfg));
        }

        match self.open(&st_cfg.path, st_cfg.size, false) {
            Ok(st) => return Ok((st, st_cfg)),
            Err(e) if !try_create || e.is_fatal() => {
                info!(path = %st_cfg.path.display(), error = %e, "cannot open statfile");
                return Err(e);
            }
            Err(e) => {
                debug!(path = %st_cfg.path.display(), error = %e, "creating statfile");
            }
        }

        self.create(&st_cfg.path, st_cfg.size)?;
        let st = self.open(&st_cfg.path, st_cfg.size, false)?;
        Ok((st, st_cfg))
    }
}
