//! Making implicit anchor packages (`python`, `lua`) explicit before the
//! solver runs.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use cx_domain::{Dist, MatchSpec, Strictness};

use crate::{config::Config, query::SolverIndexQuery};

#[derive(Debug, Clone, Copy)]
pub struct SpecAugmenter<'a> {
    config: &'a Config,
}

impl<'a> SpecAugmenter<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Return `specs` with default constraints for the anchor packages
    /// appended where the solver would otherwise pick a version freely.
    ///
    /// Each anchor is decided against the input specs only:
    ///
    /// - already constrained by a spec (strictness > 1): nothing added;
    /// - neither requested nor depended on by a matched package: nothing added;
    /// - depended on while the first spec is fully explicit: nothing added;
    /// - linked into the environment: pinned to the linked version line;
    /// - otherwise pinned to the configured default, except reserved python
    ///   lines and anchors without a default.
    ///
    /// A fully explicit spec list, or one that fails to parse, is returned
    /// unchanged. The input is never modified.
    pub fn add_defaults<'d, Q, L, S>(&self, query: &Q, linked: L, specs: &[S]) -> Vec<String>
    where
        Q: SolverIndexQuery + ?Sized,
        L: IntoIterator<Item = &'d Dist>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = specs.iter().map(|spec| spec.as_ref().to_string()).collect();
        let parsed = match out
            .iter()
            .map(|spec| MatchSpec::parse(spec))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(error = %err, "not adding default specs to unparseable input");
                return out;
            }
        };
        if query.is_explicit(&parsed) {
            debug!(specs = ?out, "specs are explicit; no defaults added");
            return out;
        }
        debug!(specs = ?out, "H0 adding default specs");

        let names_linked: BTreeMap<&str, &Dist> =
            linked.into_iter().map(|dist| (dist.name(), dist)).collect();
        let names_ms: BTreeMap<&str, &MatchSpec> =
            parsed.iter().map(|ms| (ms.name(), ms)).collect();

        let anchors = [("python", Some(self.config.default_python.as_str())), ("lua", None)];
        let mut added = Vec::new();
        for (name, default_version) in anchors {
            let named = names_ms.get(name);
            if named.is_some_and(|ms| ms.strictness() > Strictness::Name) {
                debug!(anchor = name, "H1 anchor already constrained");
                continue;
            }

            let any_depends_on = parsed.iter().any(|spec| {
                query
                    .find_matches(spec)
                    .iter()
                    .any(|filename| query.ms_depends(filename).iter().any(|dep| dep.name() == name))
            });
            debug!(anchor = name, any_depends_on, "H2");

            if !any_depends_on && named.is_none() {
                debug!(anchor = name, "H2A nothing requests the anchor");
                continue;
            }
            if any_depends_on && parsed.first().is_some_and(MatchSpec::is_exact) {
                debug!(anchor = name, "H2B first spec is explicit");
                continue;
            }
            if let Some(dist) = names_linked.get(name) {
                debug!(anchor = name, %dist, "H3 pinning linked version");
                if let Some(spec) = dist.to_pinned_spec() {
                    added.push(spec);
                }
                continue;
            }
            let Some(version) = default_version else {
                debug!(anchor = name, "no default version");
                continue;
            };
            if name == "python"
                && self
                    .config
                    .reserved_python_versions
                    .iter()
                    .any(|reserved| reserved == version)
            {
                debug!(anchor = name, version, "default python line is reserved");
                continue;
            }
            added.push(format!("{name} {version}*"));
        }
        out.extend(added);
        debug!(specs = ?out, "HF");
        out
    }
}
