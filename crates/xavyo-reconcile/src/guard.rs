//! Existence guard
//!
//! Optional pre-flight check that refuses to create an object whose display
//! name is already in use.

use tracing::{debug, instrument};

use crate::error::{ReconcileError, ReconcileResult};
use crate::traits::{NameLookup, ObjectKind, ObjectRef};

/// Fail with `DuplicateName` if any of `candidates` carries `display_name`.
///
/// Names are compared case-insensitively. A candidate without a display name
/// was returned by the lookup as a match and is treated as one.
pub fn ensure_no_conflicts(display_name: &str, candidates: &[ObjectRef]) -> ReconcileResult<()> {
    let object_ids: Vec<String> = candidates
        .iter()
        .filter(|c| {
            c.display_name
                .as_deref()
                .map_or(true, |name| name.to_lowercase() == display_name.to_lowercase())
        })
        .map(|c| c.id.to_string())
        .collect();

    if object_ids.is_empty() {
        Ok(())
    } else {
        Err(ReconcileError::DuplicateName {
            display_name: display_name.to_string(),
            object_ids,
        })
    }
}

/// Query the directory for `display_name` and fail if it is taken.
#[instrument(skip(lookup, kind), fields(kind = %kind))]
pub async fn check_name_unique<L>(
    lookup: &L,
    kind: ObjectKind,
    display_name: &str,
) -> ReconcileResult<()>
where
    L: NameLookup + ?Sized,
{
    let candidates = lookup
        .find_by_display_name(kind, display_name)
        .await
        .map_err(|e| ReconcileError::directory(display_name, "find by display name", e))?;

    debug!(candidates = candidates.len(), "Existence guard lookup complete");
    ensure_no_conflicts(display_name, &candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DirectoryError, DirectoryResult};
    use crate::ids::ObjectId;
    use async_trait::async_trait;

    fn obj(id: &str, name: Option<&str>) -> ObjectRef {
        let r = ObjectRef::new(ObjectId::parse(id).unwrap(), ObjectKind::Group);
        match name {
            Some(n) => r.with_display_name(n),
            None => r,
        }
    }

    struct Fixed(DirectoryResult<Vec<ObjectRef>>);

    #[async_trait]
    impl NameLookup for Fixed {
        async fn find_by_display_name(
            &self,
            _kind: ObjectKind,
            _display_name: &str,
        ) -> DirectoryResult<Vec<ObjectRef>> {
            match &self.0 {
                Ok(v) => Ok(v.clone()),
                Err(_) => Err(DirectoryError::transient("throttled")),
            }
        }
    }

    #[test]
    fn test_no_candidates() {
        assert!(ensure_no_conflicts("acctestGroup-1", &[]).is_ok());
    }

    #[test]
    fn test_case_insensitive_match() {
        let err = ensure_no_conflicts("acctestGroup-1", &[obj("a1", Some("ACCTESTGROUP-1"))])
            .unwrap_err();
        match err {
            ReconcileError::DuplicateName { object_ids, .. } => assert_eq!(object_ids, vec!["a1"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_lists_every_conflict() {
        let candidates = [obj("a1", Some("dup")), obj("b2", None), obj("c3", Some("other"))];
        let err = ensure_no_conflicts("dup", &candidates).unwrap_err();
        assert!(err.to_string().contains("a1, b2"));
        assert!(!err.to_string().contains("c3"));
    }

    #[tokio::test]
    async fn test_check_name_unique() {
        let lookup = Fixed(Ok(vec![obj("a1", Some("taken"))]));
        assert!(check_name_unique(&lookup, ObjectKind::Group, "free").await.is_ok());
        assert!(check_name_unique(&lookup, ObjectKind::Group, "taken").await.is_err());
    }

    #[tokio::test]
    async fn test_check_name_unique_lookup_failure() {
        let lookup = Fixed(Err(DirectoryError::transient("throttled")));
        let err = check_name_unique(&lookup, ObjectKind::Group, "x").await.unwrap_err();
        assert!(err.is_transient());
    }
}
