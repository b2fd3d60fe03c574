//! Rule Registry
//!
//! Holds every declared rule with its parsed output patterns, and answers
//! which rule produces a given target.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use log::{debug, info};

use super::pattern::{Pattern, Wildcards};
use super::rule::{InputSpec, Rule};
use crate::error::{BuildError, Result};

/// A registered rule with its output patterns parsed.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule: Arc<Rule>,
    outputs: Vec<Pattern>,
    code_hash: String,
}

impl CompiledRule {
    fn compile(rule: Rule) -> Result<Self> {
        if rule.name().is_empty() {
            return Err(BuildError::InvalidRule {
                rule: String::new(),
                message: "rule name is empty".to_string(),
            });
        }

        let outputs = rule
            .output_patterns()
            .iter()
            .map(|raw| Pattern::parse(raw))
            .collect::<Result<Vec<_>>>()?;

        // All outputs must bind the same wildcards, otherwise a match on one
        // output could not render the others.
        let mut names: Option<BTreeSet<&str>> = None;
        for pattern in &outputs {
            let these: BTreeSet<&str> = pattern.wildcard_names().into_iter().collect();
            match &names {
                Some(first) if *first != these => {
                    return Err(BuildError::InvalidRule {
                        rule: rule.name().to_string(),
                        message: format!(
                            "output patterns use different wildcards ('{}' vs '{}')",
                            outputs[0], pattern
                        ),
                    });
                }
                Some(_) => {}
                None => names = Some(these),
            }
        }
        let names = names.unwrap_or_default();

        for spec in rule.input_specs() {
            let InputSpec::Literal(templates) = spec else {
                continue;
            };
            for template in templates {
                let parsed = Pattern::parse(template)?;
                if let Some(unknown) = parsed
                    .wildcard_names()
                    .into_iter()
                    .find(|name| !names.contains(name))
                {
                    return Err(BuildError::InvalidRule {
                        rule: rule.name().to_string(),
                        message: format!(
                            "input '{}' uses wildcard '{{{}}}' that no output defines",
                            template, unknown
                        ),
                    });
                }
            }
        }

        let code_hash = rule.action().code_hash();
        Ok(Self {
            rule: Arc::new(rule),
            outputs,
            code_hash,
        })
    }

    pub fn name(&self) -> &str {
        self.rule.name()
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    pub fn outputs(&self) -> &[Pattern] {
        &self.outputs
    }

    /// Hash of the action definition, persisted with every output.
    pub fn code_hash(&self) -> &str {
        &self.code_hash
    }

    /// True if the rule can be requested by name (its outputs have no wildcards).
    pub fn is_target_rule(&self) -> bool {
        self.outputs.iter().all(Pattern::is_concrete)
    }

    /// Matches `target` against each output pattern, first match wins.
    pub fn match_target(&self, target: &str) -> Option<Wildcards> {
        self.outputs.iter().find_map(|pattern| pattern.matches(target))
    }
}

/// A rule able to produce a target, with the wildcards the match bound.
#[derive(Debug, Clone)]
pub struct RuleMatch<'r> {
    pub rule: &'r CompiledRule,
    pub wildcards: Wildcards,
}

/// The set of declared rules.
///
/// Constructed explicitly and passed by reference to the engine.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    rules: Vec<CompiledRule>,
    by_name: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a rule.
    ///
    /// Fails if the name is taken, a pattern is malformed, the rule's
    /// wildcards are inconsistent, or an output pattern has the same literal
    /// structure as one from another rule.
    pub fn register(&mut self, rule: Rule) -> Result<()> {
        if self.by_name.contains_key(rule.name()) {
            return Err(BuildError::DuplicateRule {
                name: rule.name().to_string(),
            });
        }

        let compiled = CompiledRule::compile(rule)?;

        for pattern in compiled.outputs() {
            let structure = pattern.structure();
            let clash = self.rules.iter().find(|existing| {
                existing
                    .outputs()
                    .iter()
                    .any(|other| other.structure() == structure)
            });
            if let Some(existing) = clash {
                return Err(BuildError::PatternCollision {
                    rule: compiled.name().to_string(),
                    existing: existing.name().to_string(),
                    pattern: pattern.to_string(),
                });
            }
        }

        debug!(
            "Registered rule '{}' with outputs {:?}",
            compiled.name(),
            compiled.rule().output_patterns()
        );
        self.by_name
            .insert(compiled.name().to_string(), self.rules.len());
        self.rules.push(compiled);
        Ok(())
    }

    /// Registers several rules, stopping at the first error.
    pub fn register_all(&mut self, rules: impl IntoIterator<Item = Rule>) -> Result<()> {
        for rule in rules {
            self.register(rule)?;
        }
        info!("Registry holds {} rules", self.rules.len());
        Ok(())
    }

    /// Gets a rule by name.
    pub fn get(&self, name: &str) -> Option<&CompiledRule> {
        self.by_name.get(name).map(|&index| &self.rules[index])
    }

    /// Every rule with an output pattern matching `target`.
    pub fn candidates(&self, target: &str) -> Vec<RuleMatch<'_>> {
        self.rules
            .iter()
            .filter_map(|rule| {
                rule.match_target(target)
                    .map(|wildcards| RuleMatch { rule, wildcards })
            })
            .collect()
    }

    /// The unique rule producing `target`.
    pub fn lookup(&self, target: &str) -> Result<RuleMatch<'_>> {
        let mut candidates = self.candidates(target);
        match candidates.len() {
            0 => Err(BuildError::NoRuleFound {
                target: target.to_string(),
                required_by: None,
            }),
            1 => Ok(candidates.remove(0)),
            _ => Err(BuildError::AmbiguousRule {
                target: target.to_string(),
                rules: candidates
                    .iter()
                    .map(|c| c.rule.name().to_string())
                    .collect(),
            }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
