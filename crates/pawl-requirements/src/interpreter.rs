use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use crate::{ParseError, Requirement, RequirementOrigin};

/// The interpreter versions a resolve must support, expressed as dependency
/// specifiers against interpreter names, e.g. `CPython>=3.8,<4` or
/// `PyPy==7.3.*`.
#[derive(Debug, Clone, Default, Eq, PartialEq, Hash)]
pub struct InterpreterConstraints(BTreeSet<Requirement>);

impl InterpreterConstraints {
    pub fn new(constraints: impl IntoIterator<Item = Requirement>) -> Self {
        Self(constraints.into_iter().collect())
    }

    /// Parse a list of constraint strings. A constraint that starts with a
    /// version comparison rather than an interpreter name, such as
    /// `>=3.8,<4`, applies to `CPython`.
    pub fn parse<'a>(
        constraints: impl IntoIterator<Item = &'a str>,
        origin: Option<&RequirementOrigin>,
    ) -> Result<Self, ParseError> {
        let mut parsed = BTreeSet::new();
        for constraint in constraints {
            let constraint = constraint.trim();
            let requirement = if constraint
                .chars()
                .next()
                .is_some_and(|char| char.is_ascii_alphabetic())
            {
                constraint.parse::<Requirement>()
            } else {
                format!("CPython{constraint}").parse::<Requirement>()
            };
            let requirement = match (requirement, origin) {
                (Ok(requirement), Some(origin)) => requirement.with_origin(origin.clone()),
                (Ok(requirement), None) => requirement,
                (Err(err), origin) => {
                    return Err(ParseError {
                        origin: origin.cloned(),
                        ..err
                    });
                }
            };
            parsed.insert(requirement);
        }
        Ok(Self(parsed))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Requirement> {
        self.0.iter()
    }

    /// Render the repeated `--interpreter-constraint <ic>` argv pairs, in
    /// sorted order.
    pub fn to_arg_list(&self) -> Vec<String> {
        self.0
            .iter()
            .flat_map(|constraint| {
                ["--interpreter-constraint".to_string(), constraint.to_string()]
            })
            .collect()
    }
}

impl FromIterator<Requirement> for InterpreterConstraints {
    fn from_iter<T: IntoIterator<Item = Requirement>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Display for InterpreterConstraints {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            self.0
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}
