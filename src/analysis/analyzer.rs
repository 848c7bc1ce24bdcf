use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::RwLock;
use crate::analysis::token::Token;
use crate::analysis::tokenizer::{StandardTokenizer, Tokenizer};
use crate::core::error::{Error, ErrorKind, Result};

/// Text analysis pipeline: tokenize, then lowercase.
pub struct Analyzer {
    pub tokenizer: Box<dyn Tokenizer>,
    pub name: String,
}

impl Analyzer {
    pub fn new(name: &str, tokenizer: Box<dyn Tokenizer>) -> Self {
        Analyzer {
            tokenizer,
            name: name.to_string(),
        }
    }

    pub fn analyze(&self, text: &str) -> Vec<Token> {
        let mut tokens = self.tokenizer.tokenize(text);
        for token in &mut tokens {
            token.text = token.text.to_lowercase();
        }
        tokens
    }

    /// Default analyzer used when an index definition names no other.
    pub fn standard() -> Self {
        Analyzer::new("standard", Box::new(StandardTokenizer::default()))
    }
}

/// Registry mapping analyzer names from index definitions to pipelines.
pub struct AnalyzerRegistry {
    analyzers: Arc<RwLock<HashMap<String, Arc<Analyzer>>>>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        let registry = AnalyzerRegistry {
            analyzers: Arc::new(RwLock::new(HashMap::new())),
        };
        registry.register("standard", Analyzer::standard());
        registry
    }

    pub fn register(&self, name: &str, analyzer: Analyzer) {
        self.analyzers
            .write()
            .insert(name.to_string(), Arc::new(analyzer));
    }

    pub fn get(&self, name: &str) -> Result<Arc<Analyzer>> {
        self.analyzers.read().get(name).cloned().ok_or_else(|| Error {
            kind: ErrorKind::NotFound,
            context: format!("Analyzer '{}' not found", name),
        })
    }
}

impl Default for AnalyzerRegistry {
    fn default() -> Self {
        AnalyzerRegistry::new()
    }
}
