//! Structural method predicates.

use crate::module::Method;

/// Anything that can decide whether a method is a patch target.
pub trait MethodFilter {
    /// Whether `method` should be patched. Called once per method, in table order.
    fn matches(&self, method: &Method) -> bool;
}

impl<F> MethodFilter for F
where
    F: Fn(&Method) -> bool,
{
    fn matches(&self, method: &Method) -> bool {
        self(method)
    }
}

/// Condition on parameter names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamNames {
    /// Every parameter is named this.
    All(String),
    /// Parameter names equal this list, in order.
    Exact(Vec<String>),
}

impl ParamNames {
    fn matches(&self, method: &Method) -> bool {
        match self {
            Self::All(name) => method.parameters.iter().all(|p| &p.name == name),
            Self::Exact(names) => {
                names.len() == method.parameters.len()
                    && names.iter().zip(&method.parameters).all(|(n, p)| *n == p.name)
            }
        }
    }
}

/// Matches methods by exact name, staticness and parameter names.
///
/// Methods without parameters never match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodPredicate {
    /// Exact, case-sensitive method name.
    pub name: String,
    /// Required value of `MethodAttributes.Static`.
    pub is_static: bool,
    /// Required parameter names.
    pub params: ParamNames,
}

impl MethodPredicate {
    /// Instance method whose parameters are named exactly `params`.
    #[must_use]
    pub fn instance(name: impl Into<String>, params: &[&str]) -> Self {
        Self {
            name: name.into(),
            is_static: false,
            params: ParamNames::Exact(params.iter().map(ToString::to_string).collect()),
        }
    }

    /// Static method whose parameters are named exactly `params`.
    #[must_use]
    pub fn static_method(name: impl Into<String>, params: &[&str]) -> Self {
        Self {
            is_static: true,
            ..Self::instance(name, params)
        }
    }

    /// Require every parameter to be named `param` instead of an exact list.
    #[must_use]
    pub fn all_params_named(mut self, param: impl Into<String>) -> Self {
        self.params = ParamNames::All(param.into());
        self
    }

    /// Evaluate the predicate.
    #[must_use]
    pub fn matches(&self, method: &Method) -> bool {
        method.name == self.name
            && method.is_static() == self.is_static
            && method.param_count() > 0
            && self.params.matches(method)
    }
}

impl MethodFilter for MethodPredicate {
    fn matches(&self, method: &Method) -> bool {
        MethodPredicate::matches(self, method)
    }
}
