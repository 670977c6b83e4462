//! Patch rules and their application to a module.

use std::fmt;
use std::str::FromStr;

use crate::audit::{AuditEvent, AuditSink};
use crate::error::{Error, Result};
use crate::matcher::{MethodFilter, MethodPredicate, ParamNames};
use crate::module::{Method, Module};
use crate::rewriter::{self, Replacement};
use crate::signature::ReturnKind;
use crate::token::Token;

/// What to do when several rules match the same method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverlapPolicy {
    /// Apply every match in order; the last rule's body is the one kept.
    #[default]
    LastWins,
    /// Fail before modifying anything.
    Reject,
}

/// A labelled predicate plus the body it installs.
pub struct PatchRule {
    label: String,
    filter: Box<dyn MethodFilter>,
    replacement: Replacement,
}

impl PatchRule {
    /// Create a rule from any filter.
    pub fn new(
        label: impl Into<String>,
        filter: impl MethodFilter + 'static,
        replacement: Replacement,
    ) -> Self {
        Self {
            label: label.into(),
            filter: Box::new(filter),
            replacement,
        }
    }

    /// Rule label used in audit events and errors.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn replacement(&self) -> &Replacement {
        &self.replacement
    }

    /// Whether the rule targets `method`.
    #[must_use]
    pub fn matches(&self, method: &Method) -> bool {
        self.filter.matches(method)
    }
}

impl fmt::Debug for PatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchRule")
            .field("label", &self.label)
            .field("replacement", &self.replacement)
            .finish_non_exhaustive()
    }
}

/// Parses `[static|instance] Name(p1, p2) -> value`.
///
/// The parameter list is an exact ordered list of names, or `name*` for "every
/// parameter is named `name`". The value is `true`, `false`, `void`, an integer
/// (decimal or `0x` hex) or a double-quoted string with `\"` and `\\` escapes.
impl FromStr for PatchRule {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let rule = text.trim();
        let (is_static, rest) = if let Some(rest) = rule.strip_prefix("static ") {
            (true, rest.trim_start())
        } else if let Some(rest) = rule.strip_prefix("instance ") {
            (false, rest.trim_start())
        } else {
            (false, rule)
        };

        let open = rest
            .find('(')
            .ok_or_else(|| Error::invalid_rule(rule, "expected '(' after the method name"))?;
        let close = rest[open..]
            .find(')')
            .map(|i| open + i)
            .ok_or_else(|| Error::invalid_rule(rule, "unterminated parameter list"))?;

        let name = rest[..open].trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(Error::invalid_rule(rule, "invalid method name"));
        }

        let params = parse_params(rule, &rest[open + 1..close])?;

        let value = rest[close + 1..]
            .trim_start()
            .strip_prefix("->")
            .ok_or_else(|| Error::invalid_rule(rule, "expected '->' after the parameter list"))?;
        let replacement = parse_value(rule, value.trim())?;

        let predicate = MethodPredicate {
            name: name.to_string(),
            is_static,
            params,
        };
        Ok(Self::new(rule, predicate, replacement))
    }
}

fn parse_params(rule: &str, list: &str) -> Result<ParamNames> {
    let names: Vec<&str> = list.split(',').map(str::trim).collect();
    if names.iter().any(|n| n.is_empty()) {
        return Err(Error::invalid_rule(
            rule,
            "a rule needs at least one parameter name",
        ));
    }
    if names.iter().any(|n| n.contains(char::is_whitespace)) {
        return Err(Error::invalid_rule(rule, "invalid parameter name"));
    }
    if let [single] = names.as_slice() {
        if let Some(name) = single.strip_suffix('*') {
            if name.is_empty() || name.contains('*') {
                return Err(Error::invalid_rule(rule, "'*' needs a parameter name"));
            }
            return Ok(ParamNames::All(name.to_string()));
        }
    }
    if names.iter().any(|n| n.contains('*')) {
        return Err(Error::invalid_rule(rule, "'*' is only valid with a single parameter name"));
    }
    Ok(ParamNames::Exact(names.into_iter().map(str::to_string).collect()))
}

fn parse_value(rule: &str, value: &str) -> Result<Replacement> {
    match value {
        "true" => return Ok(Replacement::return_bool(true)),
        "false" => return Ok(Replacement::return_bool(false)),
        "void" => return Ok(Replacement::ReturnVoid),
        "" => return Err(Error::invalid_rule(rule, "missing return value")),
        _ => {}
    }

    if let Some(quoted) = value.strip_prefix('"') {
        let mut literal = String::new();
        let mut chars = quoted.chars();
        while let Some(c) = chars.next() {
            match c {
                '"' => {
                    if !chars.as_str().trim().is_empty() {
                        return Err(Error::invalid_rule(rule, "unexpected text after string"));
                    }
                    return Ok(Replacement::ReturnString(literal));
                }
                '\\' => match chars.next() {
                    Some(escaped @ ('"' | '\\')) => literal.push(escaped),
                    _ => return Err(Error::invalid_rule(rule, "invalid escape in string")),
                },
                c => literal.push(c),
            }
        }
        return Err(Error::invalid_rule(rule, "unterminated string"));
    }

    let parsed = if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map(|v| v as i32)
    } else {
        value.parse::<i32>()
    };
    parsed
        .map(Replacement::ReturnInt)
        .map_err(|_| Error::invalid_rule(rule, format!("unsupported return value '{value}'")))
}

/// A method patched by [`RuleSet::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchedMethod {
    pub token: Token,
    /// Display name, `Type::Name(params)`.
    pub method: String,
    /// Label of the rule whose body was kept.
    pub rule: String,
}

/// Outcome of applying a rule set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchReport {
    pub patched: Vec<PatchedMethod>,
}

impl PatchReport {
    /// Number of patched methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.patched.len()
    }

    /// Whether nothing matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patched.is_empty()
    }
}

/// An ordered list of rules plus an overlap policy.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<PatchRule>,
    policy: OverlapPolicy,
}

impl RuleSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_policy(mut self, policy: OverlapPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Append a rule; later rules supersede earlier ones on overlap.
    pub fn push(&mut self, rule: PatchRule) {
        self.rules.push(rule);
    }

    /// Move every rule of `other` to the end of this set, keeping this set's policy.
    pub fn append(&mut self, other: RuleSet) {
        self.rules.extend(other.rules);
    }

    #[must_use]
    pub fn rule(mut self, rule: PatchRule) -> Self {
        self.push(rule);
        self
    }

    #[must_use]
    pub fn rules(&self) -> &[PatchRule] {
        &self.rules
    }

    #[must_use]
    pub fn policy(&self) -> OverlapPolicy {
        self.policy
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Replace the body of every method matched by a rule.
    ///
    /// Methods are visited once each in declaration order. Under
    /// [`OverlapPolicy::Reject`] the module is left untouched if any method is
    /// matched by two rules.
    pub fn apply(&self, module: &mut Module, sink: &mut dyn AuditSink) -> Result<PatchReport> {
        let plan: Vec<Vec<usize>> = module
            .methods()
            .map(|method| {
                (0..self.rules.len())
                    .filter(|&i| self.rules[i].matches(method))
                    .collect()
            })
            .collect();

        if self.policy == OverlapPolicy::Reject {
            let overlap = module.methods().zip(&plan).find(|(_, m)| m.len() > 1);
            if let Some((method, matched)) = overlap {
                return Err(Error::OverlappingRules {
                    method: method.to_string(),
                    first: self.rules[matched[0]].label.clone(),
                    second: self.rules[matched[1]].label.clone(),
                });
            }
        }

        let mut report = PatchReport::default();
        for (method, matched) in module.methods_mut().zip(plan) {
            let Some(&last) = matched.last() else {
                continue;
            };
            if method.body().is_none() {
                log::warn!("{method} matched '{}' but has no IL body; skipped", self.rules[last].label);
                continue;
            }
            for &index in &matched {
                let rule = &self.rules[index];
                if let Some(kind) = return_mismatch(&rule.replacement, method) {
                    log::warn!(
                        "rule '{}' returns {kind:?} but {method} is declared to return {:?}",
                        rule.label,
                        method.return_kind
                    );
                }
                rewriter::replace_body(method, rule.replacement.instructions());
                log::debug!("{method}: body replaced by '{}'", rule.label);
            }

            let patched = PatchedMethod {
                token: method.token,
                method: method.to_string(),
                rule: self.rules[last].label.clone(),
            };
            sink.record(&AuditEvent::Patched {
                method: patched.method.clone(),
                rule: patched.rule.clone(),
            });
            report.patched.push(patched);
        }

        if report.is_empty() {
            sink.record(&AuditEvent::NoMatches);
        }
        Ok(report)
    }
}

/// One rule per line; blank lines and lines starting with `#` are ignored.
impl FromStr for RuleSet {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let mut rules = Self::new();
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            rules.push(line.parse()?);
        }
        Ok(rules)
    }
}

/// The replacement's return class when it differs from what `method` declares.
fn return_mismatch(replacement: &Replacement, method: &Method) -> Option<ReturnKind> {
    replacement
        .return_kind()
        .filter(|&kind| kind != method.return_kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::il::Instruction;
    use crate::test::{ImageBuilder, MethodSpec};

    fn module() -> Module {
        let image = ImageBuilder::new()
            .namespace("Acme.Licensing")
            .class("Foo")
            .method(MethodSpec::instance("IsFeatureActivated", &["featureGuid"]).returns_bool())
            .method(MethodSpec::instance("IsFeatureActivated", &[]).returns_bool())
            .method(MethodSpec::static_("GetEdition", &["key"]).returns_string())
            .method(MethodSpec::instance("Refresh", &["force", "force"]))
            .method(MethodSpec::instance("Untouched", &["x"]).returns_int())
            .build();
        Module::parse(&image).unwrap()
    }

    fn collect(rules: &RuleSet, module: &mut Module) -> (PatchReport, Vec<AuditEvent>) {
        let mut events = Vec::new();
        let report = rules
            .apply(module, &mut |e: &AuditEvent| events.push(e.clone()))
            .unwrap();
        (report, events)
    }

    #[test]
    fn test_parse_rule_forms() {
        let rule: PatchRule = "IsFeatureActivated(featureGuid) -> true".parse().unwrap();
        assert_eq!(rule.label(), "IsFeatureActivated(featureGuid) -> true");
        assert_eq!(rule.replacement(), &Replacement::ReturnInt(1));

        let rule: PatchRule = r#" static GetEdition( key ) -> "Ultra \"Pro\"" "#.parse().unwrap();
        assert_eq!(
            rule.replacement(),
            &Replacement::ReturnString("Ultra \"Pro\"".to_string())
        );

        let rule: PatchRule = "instance Refresh(force*) -> void".parse().unwrap();
        assert_eq!(rule.replacement(), &Replacement::ReturnVoid);

        let rule: PatchRule = "Limit(a, b) -> -5".parse().unwrap();
        assert_eq!(rule.replacement(), &Replacement::ReturnInt(-5));
        let rule: PatchRule = "Limit(a) -> 0xFF".parse().unwrap();
        assert_eq!(rule.replacement(), &Replacement::ReturnInt(255));
    }

    #[test]
    fn test_parse_rule_errors() {
        for text in [
            "IsFeatureActivated -> true",
            "IsFeatureActivated(featureGuid true",
            "IsFeatureActivated() -> true",
            "IsFeatureActivated(a) => true",
            "IsFeatureActivated(a) -> maybe",
            "IsFeatureActivated(a, b*) -> 1",
            "IsFeatureActivated(a) -> \"open",
            "Is Feature(a) -> 1",
        ] {
            let err = text.parse::<PatchRule>().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Rule, "{text}");
        }
    }

    #[test]
    fn test_parse_rule_file() {
        let rules: RuleSet = "# license checks\n\nIsFeatureActivated(featureGuid) -> true\n  static GetEdition(key) -> \"Pro\"\n"
            .parse()
            .unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules.policy(), OverlapPolicy::LastWins);
    }

    #[test]
    fn test_three_rules_patch_three_methods() {
        let mut module = module();
        let rules: RuleSet = "IsFeatureActivated(featureGuid) -> true\nstatic GetEdition(key) -> \"Pro\"\nRefresh(force*) -> void"
            .parse()
            .unwrap();
        let untouched = module.find_method("Acme.Licensing.Foo", "Untouched").unwrap().body().cloned();

        let (report, events) = collect(&rules, &mut module);
        assert_eq!(report.len(), 3);
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0],
            AuditEvent::Patched {
                method: "Acme.Licensing.Foo::IsFeatureActivated(featureGuid)".to_string(),
                rule: "IsFeatureActivated(featureGuid) -> true".to_string(),
            }
        );
        let modified: Vec<_> = module.methods().filter(|m| m.is_modified()).map(|m| m.name.as_str()).collect();
        assert_eq!(modified, ["IsFeatureActivated", "GetEdition", "Refresh"]);
        let after = module.find_method("Acme.Licensing.Foo", "Untouched").unwrap();
        assert_eq!(after.body().cloned(), untouched);
        assert!(!after.is_modified());
    }

    #[test]
    fn test_no_matches_is_reported_not_an_error() {
        let mut module = module();
        let rules: RuleSet = "Missing(x) -> true".parse().unwrap();
        let (report, events) = collect(&rules, &mut module);
        assert!(report.is_empty());
        assert_eq!(events, [AuditEvent::NoMatches]);
        assert!(!module.is_modified());
    }

    #[test]
    fn test_overlap_last_wins() {
        let mut module = module();
        let rules = RuleSet::new()
            .rule("IsFeatureActivated(featureGuid) -> false".parse().unwrap())
            .rule(PatchRule::new(
                "any IsFeatureActivated",
                |m: &Method| m.name == "IsFeatureActivated" && m.param_count() == 1,
                Replacement::return_bool(true),
            ));
        let (report, events) = collect(&rules, &mut module);
        assert_eq!(report.len(), 1);
        assert_eq!(events.len(), 1);
        assert_eq!(report.patched[0].rule, "any IsFeatureActivated");
        let method = module.find_method("Acme.Licensing.Foo", "IsFeatureActivated").unwrap();
        assert_eq!(
            method.body().unwrap().instructions,
            [Instruction::ldc_i4(1), Instruction::ret()]
        );
    }

    #[test]
    fn test_overlap_reject_leaves_module_untouched() {
        let mut module = module();
        let rules = RuleSet::new()
            .with_policy(OverlapPolicy::Reject)
            .rule("static GetEdition(key) -> \"Pro\"".parse().unwrap())
            .rule("IsFeatureActivated(featureGuid) -> false".parse().unwrap())
            .rule("IsFeatureActivated(featureGuid*) -> true".parse().unwrap());

        let mut events = Vec::new();
        let err = rules
            .apply(&mut module, &mut |e: &AuditEvent| events.push(e.clone()))
            .unwrap_err();
        match err {
            Error::OverlappingRules { method, first, second } => {
                assert_eq!(method, "Acme.Licensing.Foo::IsFeatureActivated(featureGuid)");
                assert_eq!(first, "IsFeatureActivated(featureGuid) -> false");
                assert_eq!(second, "IsFeatureActivated(featureGuid*) -> true");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(events.is_empty());
        assert!(!module.is_modified());
    }

    #[test]
    fn test_mismatched_return_class_still_applies() {
        let mut module = module();
        let rules: RuleSet = "Untouched(x) -> \"text\"".parse().unwrap();
        let (report, _) = collect(&rules, &mut module);
        assert_eq!(report.len(), 1);
    }

    #[test]
    fn test_int_literal_for_long_return_is_a_mismatch() {
        let image = ImageBuilder::new()
            .class("Clock")
            .method(MethodSpec::static_("GetTicks", &["since"]).returns_long())
            .method(MethodSpec::static_("GetCount", &["since"]).returns_int())
            .build();
        let module = Module::parse(&image).unwrap();
        let ticks = module.find_method("Clock", "GetTicks").unwrap();
        let count = module.find_method("Clock", "GetCount").unwrap();

        assert_eq!(ticks.return_kind, ReturnKind::WideInteger);
        assert_eq!(
            return_mismatch(&Replacement::ReturnInt(7), ticks),
            Some(ReturnKind::Integer)
        );
        assert_eq!(return_mismatch(&Replacement::ReturnInt(7), count), None);
        assert_eq!(return_mismatch(&Replacement::Instructions(Vec::new()), ticks), None);
    }
}
