use std::cmp::Ordering;

use tracing::debug;

use cx_domain::{IndexEntry, MatchSpec, PackageIndex, VersionOrder};

/// The index lookups spec augmentation needs from the solver side.
pub trait SolverIndexQuery {
    /// Filenames of every index entry matching `spec`.
    fn find_matches(&self, spec: &MatchSpec) -> Vec<String>;

    /// Parsed dependencies of the entry stored under `filename`.
    fn ms_depends(&self, filename: &str) -> Vec<MatchSpec>;

    /// True when every spec pins a single package.
    fn is_explicit(&self, specs: &[MatchSpec]) -> bool {
        specs.iter().all(MatchSpec::is_exact)
    }
}

impl<Q: SolverIndexQuery + ?Sized> SolverIndexQuery for &Q {
    fn find_matches(&self, spec: &MatchSpec) -> Vec<String> {
        (**self).find_matches(spec)
    }

    fn ms_depends(&self, filename: &str) -> Vec<MatchSpec> {
        (**self).ms_depends(filename)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IndexQuery<'a> {
    index: &'a PackageIndex,
}

impl<'a> IndexQuery<'a> {
    pub fn new(index: &'a PackageIndex) -> Self {
        Self { index }
    }

    /// Entries named `name`, oldest first by version then build number.
    pub fn packages_named(&self, name: &str) -> Vec<(&'a str, &'a IndexEntry)> {
        let mut found: Vec<_> = self
            .index
            .iter()
            .filter(|(_, entry)| entry.name == name)
            .map(|(filename, entry)| (filename.as_str(), entry))
            .collect();
        found.sort_by(|(_, a), (_, b)| compare_entries(a, b));
        found
    }
}

impl SolverIndexQuery for IndexQuery<'_> {
    fn find_matches(&self, spec: &MatchSpec) -> Vec<String> {
        self.index
            .iter()
            .filter(|(_, entry)| spec.matches(entry))
            .map(|(filename, _)| filename.clone())
            .collect()
    }

    fn ms_depends(&self, filename: &str) -> Vec<MatchSpec> {
        let Some(entry) = self.index.get(filename) else {
            return Vec::new();
        };
        entry
            .depends
            .iter()
            .filter_map(|dep| match MatchSpec::parse(dep) {
                Ok(spec) => Some(spec),
                Err(err) => {
                    debug!(%filename, dependency = %dep, error = %err, "ignoring unparseable dependency");
                    None
                }
            })
            .collect()
    }
}

fn compare_entries(a: &IndexEntry, b: &IndexEntry) -> Ordering {
    VersionOrder::parse(&a.version)
        .cmp(&VersionOrder::parse(&b.version))
        .then(a.build_number.cmp(&b.build_number))
        .then_with(|| a.build.cmp(&b.build))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> PackageIndex {
        [
            IndexEntry::new("numpy", "1.10.4", "py27_0").with_depends(["python 2.7*", "bad 1 2 3 4"]),
            IndexEntry::new("numpy", "1.9.3", "py27_0").with_depends(["python 2.7*"]),
            IndexEntry::new("python", "2.7.11", "0"),
            IndexEntry::new("python", "3.5.1", "0"),
        ]
        .into_iter()
        .map(|entry| (entry.filename(), entry))
        .collect()
    }

    #[test]
    fn find_matches_returns_filenames() {
        let index = index();
        let query = IndexQuery::new(&index);
        let spec = MatchSpec::parse("python 2.7*").unwrap();
        assert_eq!(query.find_matches(&spec), vec!["python-2.7.11-0.tar.bz2"]);
        let spec = MatchSpec::parse("numpy").unwrap();
        assert_eq!(query.find_matches(&spec).len(), 2);
        assert!(query
            .find_matches(&MatchSpec::parse("scipy").unwrap())
            .is_empty());
    }

    #[test]
    fn ms_depends_skips_unparseable_entries() {
        let index = index();
        let query = IndexQuery::new(&index);
        let deps = query.ms_depends("numpy-1.10.4-py27_0.tar.bz2");
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].name(), "python");
        assert!(query.ms_depends("missing-1-0.tar.bz2").is_empty());
    }

    #[test]
    fn explicit_means_every_spec_is_exact() {
        let index = index();
        let query = IndexQuery::new(&index);
        let exact = MatchSpec::parse("numpy 1.10.4 py27_0").unwrap();
        let loose = MatchSpec::parse("python").unwrap();
        assert!(query.is_explicit(&[exact.clone()]));
        assert!(!query.is_explicit(&[exact, loose]));
    }

    #[test]
    fn packages_are_ordered_by_version() {
        let index = index();
        let versions: Vec<_> = IndexQuery::new(&index)
            .packages_named("numpy")
            .into_iter()
            .map(|(_, entry)| entry.version.as_str())
            .collect();
        assert_eq!(versions, ["1.9.3", "1.10.4"]);
    }
}
