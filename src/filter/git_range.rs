//! Diff computation backing `[<rev>...<rev>]` filter terms (C4).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::FilterError;

/// Repo-relative paths touched between two revisions, split by whether the
/// path still exists on the `to` side.
#[derive(Debug, Default, Clone)]
pub struct GitRangeDiff {
    pub changed: HashSet<PathBuf>,
    pub deleted: HashSet<PathBuf>,
}

impl GitRangeDiff {
    fn extend(&mut self, other: GitRangeDiff) {
        self.changed.extend(other.changed);
        self.deleted.extend(other.deleted);
    }
}

/// Diffs `from...to` (anything `git2::Repository::revparse_single` accepts:
/// branch, tag, commit) within the repository containing `repo_root`.
pub fn diff(repo_root: &Path, from: &str, to: &str) -> Result<GitRangeDiff, FilterError> {
    let fail = |e: git2::Error| FilterError::GitRangeFailed { from: from.to_string(), to: to.to_string(), source: e };

    let repo = git2::Repository::discover(repo_root).map_err(fail)?;
    let resolve_tree = |rev: &str| -> Result<git2::Tree, git2::Error> { repo.revparse_single(rev)?.peel_to_tree() };
    let from_tree = resolve_tree(from).map_err(fail)?;
    let to_tree = resolve_tree(to).map_err(fail)?;
    let tree_diff = repo.diff_tree_to_tree(Some(&from_tree), Some(&to_tree), None).map_err(fail)?;

    let mut out = GitRangeDiff::default();
    tree_diff
        .foreach(
            &mut |delta, _| {
                let old_path = delta.old_file().path().map(Path::to_path_buf);
                let new_path = delta.new_file().path().map(Path::to_path_buf);
                match delta.status() {
                    git2::Delta::Deleted => {
                        if let Some(p) = old_path {
                            out.deleted.insert(p);
                        }
                    }
                    _ => {
                        if let Some(p) = new_path.or(old_path) {
                            out.changed.insert(p);
                        }
                    }
                }
                true
            },
            None,
            None,
            None,
        )
        .map_err(fail)?;
    Ok(out)
}

/// Unions the diffs for every `(from, to)` pair; `allow_destroy` is `true` if
/// any of the ranges asked for it.
pub fn diff_all(repo_root: &Path, ranges: &[(String, String, bool)]) -> Result<(GitRangeDiff, bool), FilterError> {
    let mut combined = GitRangeDiff::default();
    let mut allow_destroy = false;
    for (from, to, range_allow_destroy) in ranges {
        combined.extend(diff(repo_root, from, to)?);
        allow_destroy |= range_allow_destroy;
    }
    Ok((combined, allow_destroy))
}

/// Whether `unit_relpath` (repo-relative) overlaps the diff: any touched path
/// falls under the unit's directory. With `allow_destroy`, a path deleted
/// from under the unit's directory counts too — the unit itself may still be
/// standing (destroy only needs the directory to still exist to run against),
/// even though some of its files were removed since `from`.
pub fn matches(unit_relpath: &Path, diff: &GitRangeDiff, allow_destroy: bool) -> bool {
    let under = |p: &PathBuf| p.starts_with(unit_relpath);
    diff.changed.iter().any(under) || (allow_destroy && diff.deleted.iter().any(under))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_path_under_unit_dir() {
        let mut diff = GitRangeDiff::default();
        diff.changed.insert(PathBuf::from("envs/dev/vpc/main.tf"));
        assert!(matches(Path::new("envs/dev/vpc"), &diff, false));
        assert!(!matches(Path::new("envs/dev/other"), &diff, false));
    }

    #[test]
    fn deleted_path_only_matches_with_allow_destroy() {
        let mut diff = GitRangeDiff::default();
        diff.deleted.insert(PathBuf::from("envs/dev/vpc/main.tf"));
        assert!(!matches(Path::new("envs/dev/vpc"), &diff, false));
        assert!(matches(Path::new("envs/dev/vpc"), &diff, true));
    }

    fn commit_all(repo: &git2::Repository, message: &str, parent: Option<&git2::Commit>) -> git2::Oid {
        let mut index = repo.index().unwrap();
        index.add_all(["*"], git2::IndexAddOption::DEFAULT, None).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("tester", "tester@example.com").unwrap();
        let parents: Vec<&git2::Commit> = parent.into_iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents).unwrap()
    }

    /// Two commits: `vpc/main.tf` is added, then `legacy/old.tf` is removed.
    /// Diffing `first...second` should report `vpc/main.tf` changed and
    /// `legacy/old.tf` deleted.
    #[test]
    fn diff_reports_added_and_deleted_paths_between_commits() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = git2::Repository::init(tmp.path()).unwrap();

        std::fs::create_dir_all(tmp.path().join("legacy")).unwrap();
        std::fs::write(tmp.path().join("legacy/old.tf"), "x").unwrap();
        let first = commit_all(&repo, "initial", None);

        std::fs::remove_file(tmp.path().join("legacy/old.tf")).unwrap();
        std::fs::create_dir_all(tmp.path().join("vpc")).unwrap();
        std::fs::write(tmp.path().join("vpc/main.tf"), "y").unwrap();
        let second = commit_all(&repo, "second", Some(&repo.find_commit(first).unwrap()));

        let result = diff(tmp.path(), &first.to_string(), &second.to_string()).unwrap();
        assert!(result.changed.contains(&PathBuf::from("vpc/main.tf")));
        assert!(result.deleted.contains(&PathBuf::from("legacy/old.tf")));

        assert!(matches(Path::new("vpc"), &result, false));
        assert!(!matches(Path::new("legacy"), &result, false));
        assert!(matches(Path::new("legacy"), &result, true));
    }

    #[test]
    fn diff_all_unions_ranges_and_ors_allow_destroy() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = git2::Repository::init(tmp.path()).unwrap();
        std::fs::write(tmp.path().join("a.tf"), "x").unwrap();
        let first = commit_all(&repo, "initial", None);
        std::fs::write(tmp.path().join("a.tf"), "y").unwrap();
        let second = commit_all(&repo, "second", Some(&repo.find_commit(first).unwrap()));

        let ranges = vec![(first.to_string(), second.to_string(), false), (first.to_string(), second.to_string(), true)];
        let (combined, allow_destroy) = diff_all(tmp.path(), &ranges).unwrap();
        assert!(combined.changed.contains(&PathBuf::from("a.tf")));
        assert!(allow_destroy);
    }
}
