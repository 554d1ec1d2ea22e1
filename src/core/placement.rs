//! The replication map: which sites store which variables.
//!
//! Even-indexed variables are replicated at every site. An odd-indexed
//! variable lives at exactly one site, `1 + (index mod 10)`, so x1 is at
//! site 2, x3 at site 4, ..., x9 and x19 at site 10. This asymmetry drives
//! availability: an odd variable is unreachable iff its lone site is down,
//! while an even variable survives any failure that leaves one restored
//! copy up.

use super::{SiteId, VarId, SITE_COUNT, VAR_COUNT};

/// True for even-indexed variables, which are stored at every site.
pub fn is_replicated(var: VarId) -> bool {
    var % 2 == 0
}

/// The unique site storing an odd variable; `None` for replicated ones.
pub fn home_site(var: VarId) -> Option<SiteId> {
    if is_replicated(var) {
        None
    } else {
        Some(1 + var % SITE_COUNT)
    }
}

/// Whether `site` stores a copy of `var`.
pub fn site_holds(site: SiteId, var: VarId) -> bool {
    is_replicated(var) || home_site(var) == Some(site)
}

/// Variables stored at `site`, in ascending index order.
pub fn vars_at(site: SiteId) -> impl Iterator<Item = VarId> {
    (1..=VAR_COUNT).filter(move |&v| site_holds(site, v))
}

pub fn valid_site(site: SiteId) -> bool {
    (1..=SITE_COUNT).contains(&site)
}

pub fn valid_var(var: VarId) -> bool {
    (1..=VAR_COUNT).contains(&var)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_odd_variables_have_one_home() {
        assert_eq!(home_site(1), Some(2));
        assert_eq!(home_site(3), Some(4));
        assert_eq!(home_site(9), Some(10));
        assert_eq!(home_site(11), Some(2));
        assert_eq!(home_site(19), Some(10));
    }

    #[test]
    fn test_even_variables_everywhere() {
        for var in [2, 4, 10, 20] {
            assert_eq!(home_site(var), None);
            for site in 1..=SITE_COUNT {
                assert!(site_holds(site, var));
            }
        }
    }

    #[test]
    fn test_odd_variables_nowhere_else() {
        assert!(site_holds(2, 1));
        assert!(!site_holds(1, 1));
        assert!(!site_holds(3, 1));
        assert!(!site_holds(10, 1));
    }

    #[test]
    fn test_site_variable_counts() {
        // Odd sites hold the ten replicated variables only; even sites pick
        // up two odd variables each (v and v+10).
        for site in (1..=SITE_COUNT).step_by(2) {
            assert_eq!(vars_at(site).count(), 10, "site {}", site);
        }
        for site in (2..=SITE_COUNT).step_by(2) {
            assert_eq!(vars_at(site).count(), 12, "site {}", site);
        }
    }

    #[test]
    fn test_every_variable_is_stored_somewhere() {
        for var in 1..=VAR_COUNT {
            assert!(
                (1..=SITE_COUNT).any(|s| site_holds(s, var)),
                "x{} has no site",
                var
            );
        }
    }
}
