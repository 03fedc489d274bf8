//! Watch engine facade
//!
//! Each call fetches one database snapshot and uses it for the whole
//! request, so a concurrent reload never mixes two databases.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::config::EngineConfig;
use crate::dwarf::{BuildOptions, DwarfError, ElfProvider};
use crate::expr::{
    parse_det_expr, parse_expr, parse_type_name, resolve, EvalError, Evaluation, Expr, Resolver,
};
use crate::symbols::{SymbolStore, TypeChild, TypeDatabase};

pub struct WatchEngine {
    store: SymbolStore,
}

impl WatchEngine {
    pub fn new(store: SymbolStore) -> Self {
        Self { store }
    }

    /// Engine reading ELF symbol files with the configured policies
    pub fn from_config(config: &EngineConfig) -> Self {
        let store = SymbolStore::new(Box::new(ElfProvider))
            .with_build_options(BuildOptions {
                duplicates: config.duplicate_symbols,
            })
            .with_failure_policy(config.on_load_failure);
        Self::new(store)
    }

    pub fn store(&self) -> &SymbolStore {
        &self.store
    }

    pub fn load_symbols(&self, path: &Path) -> Result<Arc<TypeDatabase>, DwarfError> {
        self.store.load(path)
    }

    pub fn parse(&self, text: &str) -> Result<Expr, EvalError> {
        parse_expr(text)
    }

    pub fn evaluate(&self, text: &str) -> Result<Evaluation, EvalError> {
        let expr = parse_expr(text)?;
        let db = self.store.snapshot()?;
        let evaluation = resolve(&db, &expr)?;
        debug!("Resolved `{}` to {:?}", expr, evaluation.result());
        Ok(evaluation)
    }

    /// Like `evaluate`, but the result must decode as a number
    pub fn evaluate_numeric(&self, text: &str) -> Result<Evaluation, EvalError> {
        let expr = parse_expr(text)?;
        let db = self.store.snapshot()?;
        let evaluation = resolve(&db, &expr)?;
        evaluation.require_numeric(&db)?;
        Ok(evaluation)
    }

    pub fn evaluate_det(&self, text: &str) -> Result<i64, EvalError> {
        let det = parse_det_expr(text)?;
        let db = self.store.snapshot()?;
        Resolver::new(&db).eval_det(&det)
    }

    pub fn size_of_type(&self, type_name: &str) -> Result<u64, EvalError> {
        let ty = parse_type_name(type_name)?;
        let db = self.store.snapshot()?;
        Resolver::new(&db).size_of(&ty)
    }

    pub fn type_children(&self, type_name: &str) -> Result<Vec<TypeChild>, EvalError> {
        let ty = parse_type_name(type_name)?;
        let db = self.store.snapshot()?;
        let ty = Resolver::new(&db).type_ref(&ty)?;
        Ok(db.children_of(&ty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::EvalResult;
    use crate::symbols::{Member, PrimitiveClass, StorageClass, Symbol};

    fn engine() -> WatchEngine {
        let engine = WatchEngine::from_config(&EngineConfig::default());
        let mut b = TypeDatabase::builder(4);
        let int = b.primitive("int", 4, PrimitiveClass::Signed);
        let point = b.composite(
            "Point",
            8,
            vec![
                Member {
                    name: "x".into(),
                    offset: 0,
                    ty: int,
                    bit_field: None,
                },
                Member {
                    name: "y".into(),
                    offset: 4,
                    ty: int,
                    bit_field: None,
                },
            ],
            false,
        );
        b.add_symbol(Symbol {
            name: "origin".into(),
            address: 0x2000_0000,
            ty: point,
            storage: StorageClass::Global,
            source: None,
        });
        engine.store().install(b.finish());
        engine
    }

    #[test]
    fn test_not_loaded() {
        let engine = WatchEngine::from_config(&EngineConfig::default());
        let err = engine.evaluate("origin").unwrap_err();
        assert_eq!(err, EvalError::Symbols(DwarfError::NotLoaded));
        assert_eq!(err.kind(), "not_loaded");
        // Syntax errors are reported even without symbols
        assert!(matches!(engine.evaluate("origin."), Err(EvalError::ParseFailure { .. })));
    }

    #[test]
    fn test_evaluate() {
        let engine = engine();
        let evaluation = engine.evaluate("origin.y").unwrap();
        assert!(matches!(
            evaluation.result(),
            EvalResult::Located { byte_size: Some(4), .. }
        ));
        assert!(matches!(
            engine.evaluate_numeric("origin"),
            Err(EvalError::NonNumericOnReturn { .. })
        ));
        assert!(engine.evaluate_numeric("&origin").is_ok());
    }

    #[test]
    fn test_sizes_and_children() {
        let engine = engine();
        assert_eq!(engine.size_of_type("Point").unwrap(), 8);
        assert_eq!(engine.size_of_type("Point*").unwrap(), 4);
        assert_eq!(engine.evaluate_det("sizeof(Point) * 2").unwrap(), 16);
        let children = engine.type_children("Point*").unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].name, "x");
        assert!(matches!(
            engine.type_children("Nope"),
            Err(EvalError::UnknownIdentifier { .. })
        ));
    }

    #[test]
    fn test_load_missing_symbol_file() {
        let engine = WatchEngine::from_config(&EngineConfig::default());
        let dir = tempfile::tempdir().unwrap();
        let err = engine.load_symbols(&dir.path().join("fw.elf")).unwrap_err();
        assert_eq!(err.kind(), "data_access_failure");
        assert!(matches!(
            engine.store().state(),
            crate::symbols::LoadState::Failed { .. }
        ));
    }
}
