//! Branch specification
//!
//! User requests come in three shapes (wildcard / list / groups) and are
//! normalized once into [`BranchSpec`], which the extractor and merger match
//! on exhaustively.
//!
//! Names are opaque: suffixes such as `crvcoincs.PEsPerLayer[4]` go to the
//! reader untouched.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TreeflowError};

/// Wildcard sentinel meaning "every column in the tree"
pub const WILDCARD: &str = "*";

/// Raw, unvalidated branch request
///
/// Groups are kept as an ordered list of pairs so duplicate group keys can
/// be detected (a map would silently keep the last one).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BranchRequest {
    Single(String),
    List(Vec<String>),
    Groups(Vec<(String, Vec<String>)>),
}

impl BranchRequest {
    /// Parse a YAML or JSON branch file
    ///
    /// Accepts a string, a list of names, or a mapping of group → names.
    /// Duplicate mapping keys are rejected by the YAML parser itself.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(content)?;
        match value {
            serde_yaml::Value::String(s) => Ok(BranchRequest::Single(s)),
            serde_yaml::Value::Sequence(_) => Ok(BranchRequest::List(serde_yaml::from_value(value)?)),
            serde_yaml::Value::Mapping(map) => {
                let mut groups = Vec::with_capacity(map.len());
                for (key, names) in map {
                    let key: String = serde_yaml::from_value(key)?;
                    let names: Vec<String> = serde_yaml::from_value(names)?;
                    groups.push((key, names));
                }
                Ok(BranchRequest::Groups(groups))
            }
            _ => Err(TreeflowError::branch_spec(
                "expected a branch name, a list of names, or a mapping of groups",
            )),
        }
    }

    /// Parse CLI group arguments of the form `evt=event` or `crv=a,b`
    pub fn from_group_args<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let mut groups = Vec::with_capacity(args.len());
        for arg in args {
            let arg = arg.as_ref();
            let (group, names) = arg.split_once('=').ok_or_else(|| {
                TreeflowError::branch_spec(format!("group '{arg}' must look like name=branch,branch"))
            })?;
            let names = names.split(',').map(|n| n.trim().to_string()).collect();
            groups.push((group.trim().to_string(), names));
        }
        Ok(BranchRequest::Groups(groups))
    }
}

impl From<&str> for BranchRequest {
    fn from(s: &str) -> Self {
        BranchRequest::Single(s.to_string())
    }
}

impl<S: Into<String>> From<Vec<S>> for BranchRequest {
    fn from(names: Vec<S>) -> Self {
        BranchRequest::List(names.into_iter().map(Into::into).collect())
    }
}

/// Canonical branch specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchSpec {
    /// Every column the source reports; resolved per file by the extractor
    All,
    /// One implicit group of named columns
    Flat(Vec<String>),
    /// Named groups of columns, one result entry per group
    Grouped(BTreeMap<String, Vec<String>>),
}

impl BranchSpec {
    /// Total number of requested names (0 for the wildcard)
    pub fn requested_len(&self) -> usize {
        match self {
            BranchSpec::All => 0,
            BranchSpec::Flat(names) => names.len(),
            BranchSpec::Grouped(groups) => groups.values().map(Vec::len).sum(),
        }
    }
}

/// Validate a request and turn it into a [`BranchSpec`]
pub fn normalize(request: BranchRequest) -> Result<BranchSpec> {
    match request {
        BranchRequest::Single(name) if name.trim() == WILDCARD => Ok(BranchSpec::All),
        BranchRequest::Single(name) => Ok(BranchSpec::Flat(check_names(vec![name], None)?)),
        BranchRequest::List(names) => Ok(BranchSpec::Flat(check_names(names, None)?)),
        BranchRequest::Groups(groups) => {
            if groups.is_empty() {
                return Err(TreeflowError::branch_spec("no groups given"));
            }
            let mut out = BTreeMap::new();
            for (group, names) in groups {
                if group.is_empty() {
                    return Err(TreeflowError::branch_spec("group name is empty"));
                }
                let names = check_names(names, Some(&group))?;
                if out.insert(group.clone(), names).is_some() {
                    return Err(TreeflowError::branch_spec(format!(
                        "duplicate group '{group}'"
                    )));
                }
            }
            Ok(BranchSpec::Grouped(out))
        }
    }
}

fn check_names(names: Vec<String>, group: Option<&str>) -> Result<Vec<String>> {
    let context = group
        .map(|g| format!(" in group '{g}'"))
        .unwrap_or_default();

    if names.is_empty() {
        return Err(TreeflowError::branch_spec(format!("no branches{context}")));
    }

    let mut seen = HashSet::with_capacity(names.len());
    for name in &names {
        if name.is_empty() {
            return Err(TreeflowError::branch_spec(format!("empty branch name{context}")));
        }
        if !seen.insert(name.as_str()) {
            return Err(TreeflowError::branch_spec(format!(
                "duplicate branch '{name}'{context}"
            )));
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_wildcard() {
        assert_eq!(normalize("*".into()).unwrap(), BranchSpec::All);
    }

    #[test]
    fn test_single_name_is_flat() {
        assert_eq!(
            normalize("event".into()).unwrap(),
            BranchSpec::Flat(vec!["event".into()])
        );
    }

    #[test]
    fn test_special_names_pass_through() {
        let spec = normalize(vec!["crvcoincs.PEsPerLayer[4]", "crvcoincs.sidePEsPerLayer[8]"].into())
            .unwrap();
        assert_eq!(
            spec,
            BranchSpec::Flat(vec![
                "crvcoincs.PEsPerLayer[4]".into(),
                "crvcoincs.sidePEsPerLayer[8]".into()
            ])
        );
    }

    #[test]
    fn test_duplicate_in_list_rejected() {
        let err = normalize(vec!["event", "event"].into()).unwrap_err();
        assert!(err.to_string().contains("duplicate branch 'event'"));
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(normalize(vec!["event", ""].into()).is_err());
        assert!(normalize("".into()).is_err());
        assert!(normalize(BranchRequest::List(vec![])).is_err());
    }

    #[test]
    fn test_groups() {
        let request = BranchRequest::from_group_args(&["evt=event", "crv=crvcoincs.PEs,crvcoincs.nHits"])
            .unwrap();
        let spec = normalize(request).unwrap();
        let BranchSpec::Grouped(groups) = spec else {
            panic!("expected grouped spec");
        };
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["evt"], vec!["event"]);
        assert_eq!(groups["crv"], vec!["crvcoincs.PEs", "crvcoincs.nHits"]);
    }

    #[test]
    fn test_duplicate_group_rejected() {
        let request = BranchRequest::Groups(vec![
            ("v".into(), vec!["trk.pdg".into()]),
            ("v".into(), vec!["trk.nactive".into()]),
        ]);
        let err = normalize(request).unwrap_err();
        assert!(err.to_string().contains("duplicate group 'v'"));
    }

    #[test]
    fn test_duplicate_inside_group_rejected() {
        let request = BranchRequest::Groups(vec![("v".into(), vec!["a".into(), "a".into()])]);
        let err = normalize(request).unwrap_err();
        assert!(err.to_string().contains("in group 'v'"));
    }

    #[test]
    fn test_bad_group_arg() {
        assert!(BranchRequest::from_group_args(&["no-equals-sign"]).is_err());
    }

    #[test]
    fn test_from_yaml_shapes() {
        assert_eq!(BranchRequest::from_yaml("'*'").unwrap(), BranchRequest::Single("*".into()));
        assert_eq!(
            BranchRequest::from_yaml("[event, trksegs]").unwrap(),
            BranchRequest::List(vec!["event".into(), "trksegs".into()])
        );

        let yaml = "v: [trk.pdg, trk.nactive]\nvov: [trksegs]\n";
        let spec = normalize(BranchRequest::from_yaml(yaml).unwrap()).unwrap();
        assert_eq!(spec.requested_len(), 3);

        assert!(BranchRequest::from_yaml("42").is_err());
    }
}
