use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// A content-addressed category: the id is the SHA-1 hex digest of the
/// normalized name, so re-inserting the same category is idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Category {
    /// 40-char lowercase SHA-1 hex digest of `name`.
    pub id: String,
    /// Lowercased, whitespace-trimmed category name.
    pub name: String,
}

impl Category {
    /// Build a category from a free-text name. The name is trimmed and
    /// lowercased before hashing, so two names differing only in case or
    /// surrounding whitespace collapse to the same category.
    pub fn new(name: &str) -> Self {
        let name = normalize_name(name);
        let id = hex::encode(Sha1::digest(name.as_bytes()));
        Self { id, name }
    }
}

/// Trim and lowercase a category name.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_is_sha1_of_name() {
        let cat = Category::new("sports");
        assert_eq!(cat.name, "sports");
        assert_eq!(cat.id, "150a8af76a92892f269dead204d533cbfad5cd7f");
        assert_eq!(cat.id.len(), 40);
    }

    #[test]
    fn test_name_is_normalized() {
        let cat = Category::new("  Sports ");
        assert_eq!(cat.name, "sports");
        assert_eq!(cat.id, "150a8af76a92892f269dead204d533cbfad5cd7f");
    }

    #[test]
    fn test_case_and_whitespace_variants_collapse() {
        let a = Category::new("Politics");
        let b = Category::new(" politics\t");
        assert_eq!(a, b);
        assert_eq!(a.id, "4c5fd84e89eda6074c7fed6fce2c6c199d4e2eb8");
    }

    #[test]
    fn test_distinct_names_get_distinct_ids() {
        assert_ne!(Category::new("sport").id, Category::new("sports").id);
    }
}
