//! Request handler for watchexpr-server

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};
use watchexpr_core::protocol::VariableInfo;
use watchexpr_core::{Request, Response, WatchEngine};

pub struct Handler {
    engine: Arc<WatchEngine>,
    /// Most recent background load
    loader: Option<JoinHandle<()>>,
}

impl Handler {
    pub fn new(engine: Arc<WatchEngine>) -> Self {
        Self {
            engine,
            loader: None,
        }
    }

    pub fn handle(&mut self, request: &Request) -> Response {
        match request {
            Request::LoadSymbols { path } => {
                self.start_load(PathBuf::from(path));
                Response::success()
            }
            Request::Refresh => self.handle_refresh(),
            Request::AbortLoad => {
                let aborted = self.engine.store().abort();
                Response::Success { ok: aborted }
            }
            Request::Status => self.handle_status(),
            Request::Evaluate { expr, numeric } => self.handle_evaluate(expr, *numeric),
            Request::Parse { expr } => match self.engine.parse(expr) {
                Ok(parsed) => Response::Parsed {
                    canonical: parsed.to_string(),
                },
                Err(e) => e.into(),
            },
            Request::SizeOf { type_name } => match self.engine.size_of_type(type_name) {
                Ok(size) => Response::Size { size },
                Err(e) => e.into(),
            },
            Request::ListSources => self.handle_list_sources(),
            Request::ListVariables { source } => self.handle_list_variables(source),
            Request::TypeChildren { type_name } => match self.engine.type_children(type_name) {
                Ok(children) => Response::Children { children },
                Err(e) => e.into(),
            },
            Request::Shutdown => {
                info!("Shutdown requested");
                Response::success()
            }
        }
    }

    /// Load symbols on a worker thread so status and abort stay responsive.
    /// A load already running is aborted first.
    pub fn start_load(&mut self, path: PathBuf) {
        self.stop_loader();
        info!("Loading symbol file {}", path.display());
        self.engine.store().begin_load(&path);
        let engine = Arc::clone(&self.engine);
        let handle = thread::spawn(move || match engine.load_symbols(&path) {
            Ok(db) => info!("Loaded {} symbols from {}", db.symbol_count(), path.display()),
            Err(e) => warn!("Symbol load of {} ended: {}", path.display(), e),
        });
        self.loader = Some(handle);
    }

    fn handle_refresh(&mut self) -> Response {
        match self.engine.store().last_path() {
            Some(path) => {
                self.start_load(path);
                Response::success()
            }
            None => Response::error("not_loaded", "No symbol file to refresh"),
        }
    }

    fn handle_status(&self) -> Response {
        let store = self.engine.store();
        Response::Status {
            status: store.state(),
            symbol_file: store.last_path().map(|p| p.display().to_string()),
        }
    }

    fn handle_evaluate(&self, expr: &str, numeric: bool) -> Response {
        debug!("Evaluate request: expr={}, numeric={}", expr, numeric);
        let result = if numeric {
            self.engine.evaluate_numeric(expr)
        } else {
            self.engine.evaluate(expr)
        };
        match result {
            Ok(evaluation) => Response::evaluated(evaluation),
            Err(e) => {
                debug!("Evaluation of {} failed: {}", expr, e);
                e.into()
            }
        }
    }

    fn handle_list_sources(&self) -> Response {
        match self.engine.store().snapshot() {
            Ok(db) => Response::Sources {
                sources: db.sources().to_vec(),
            },
            Err(e) => e.into(),
        }
    }

    fn handle_list_variables(&self, source: &str) -> Response {
        let db = match self.engine.store().snapshot() {
            Ok(db) => db,
            Err(e) => return e.into(),
        };
        let variables = db
            .variables_of(source)
            .into_iter()
            .map(|symbol| VariableInfo {
                name: symbol.name.clone(),
                address: symbol.address,
                type_name: db.display_id(symbol.ty),
                byte_size: db.size_of(&symbol.ty.into()),
                storage: symbol.storage,
            })
            .collect();
        Response::Variables { variables }
    }

    /// Stop any running load and wait for its thread
    pub fn finish(&mut self) {
        self.stop_loader();
    }

    fn stop_loader(&mut self) {
        if let Some(handle) = self.loader.take() {
            self.engine.store().abort();
            if handle.join().is_err() {
                warn!("Symbol loader thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use watchexpr_core::symbols::{LoadState, PrimitiveClass, SourceFile, StorageClass, Symbol};
    use watchexpr_core::{EngineConfig, EvalResult, TypeDatabase};

    fn handler() -> Handler {
        let engine = WatchEngine::from_config(&EngineConfig::default());
        let mut b = TypeDatabase::builder(4);
        let int = b.primitive("int", 4, PrimitiveClass::Signed);
        let values = b.array_of(int, Some(8));
        let source = b.add_source(SourceFile {
            name: "main.c".into(),
            directory: None,
            producer: None,
        });
        b.add_symbol(Symbol {
            name: "values".into(),
            address: 0x2000_0100,
            ty: values,
            storage: StorageClass::Static,
            source: Some(source),
        });
        engine.store().install(b.finish());
        Handler::new(Arc::new(engine))
    }

    #[test]
    fn test_evaluate_request() {
        let mut handler = handler();
        let resp = handler.handle(&Request::Evaluate {
            expr: "values[2]".into(),
            numeric: true,
        });
        let Response::Evaluated { result, blocks } = resp else {
            panic!("expected an evaluation");
        };
        assert!(blocks.is_empty());
        assert!(matches!(result, EvalResult::Located { byte_size: Some(4), .. }));
    }

    #[test]
    fn test_error_kinds() {
        let mut handler = handler();
        let resp = handler.handle(&Request::Evaluate {
            expr: "values[".into(),
            numeric: false,
        });
        assert!(matches!(resp, Response::Error { ref kind, .. } if kind == "parse_failure"));

        let resp = handler.handle(&Request::SizeOf {
            type_name: "Missing".into(),
        });
        assert!(matches!(resp, Response::Error { ref kind, .. } if kind == "unknown_identifier"));
    }

    #[test]
    fn test_listings() {
        let mut handler = handler();
        let Response::Variables { variables } = handler.handle(&Request::ListVariables {
            source: "main.c".into(),
        }) else {
            panic!("expected variables");
        };
        assert_eq!(variables.len(), 1);
        assert_eq!(variables[0].type_name, "int[8]");
        assert_eq!(variables[0].byte_size, Some(32));

        let resp = handler.handle(&Request::Parse {
            expr: "( values )[ 1+2 ]".into(),
        });
        assert_eq!(
            resp,
            Response::Parsed {
                canonical: "(values)[1 + 2]".into()
            }
        );
    }

    #[test]
    fn test_load_visible_before_worker_runs() {
        let mut handler = handler();
        let missing = |name: &str| {
            std::env::temp_dir()
                .join("watchexpr-handler-test")
                .join(name)
                .display()
                .to_string()
        };

        handler.handle(&Request::LoadSymbols { path: missing("first.elf") });
        let Response::Status { status, symbol_file } = handler.handle(&Request::Status) else {
            panic!("expected a status");
        };
        assert!(matches!(status, LoadState::Loading | LoadState::Failed { .. }));
        assert_eq!(symbol_file, Some(missing("first.elf")));
        // The installed database is not served while a load is pending
        assert!(matches!(
            handler.handle(&Request::Evaluate {
                expr: "values".into(),
                numeric: false
            }),
            Response::Error { .. }
        ));

        handler.handle(&Request::LoadSymbols { path: missing("second.elf") });
        handler.finish();
        assert!(handler.loader.is_none());
        let store = handler.engine.store();
        assert!(matches!(
            store.state(),
            LoadState::Failed { ref kind, .. } if kind == "data_access_failure"
        ));
        assert_eq!(store.last_path(), Some(PathBuf::from(missing("second.elf"))));
    }

    #[test]
    fn test_refresh_without_symbol_file() {
        let mut handler = handler();
        let resp = handler.handle(&Request::Refresh);
        assert!(matches!(resp, Response::Error { ref kind, .. } if kind == "not_loaded"));
    }
}
