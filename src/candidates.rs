// 🔎 Candidate Filter - exact-key partitions of the registry
// Plain equality selection; registry order is preserved. Empty = no candidates.

use crate::records::RegistryRecord;
use chrono::NaiveDate;

/// Generic equality filter
pub fn filter<'a, P>(registry: &'a [RegistryRecord], predicate: P) -> Vec<&'a RegistryRecord>
where
    P: Fn(&RegistryRecord) -> bool,
{
    registry.iter().filter(|r| predicate(r)).collect()
}

pub fn by_birthdate(registry: &[RegistryRecord], birthdate: NaiveDate) -> Vec<&RegistryRecord> {
    filter(registry, |r| r.birthdate == Some(birthdate))
}

pub fn by_identifier(registry: &[RegistryRecord], id: i64) -> Vec<&RegistryRecord> {
    filter(registry, |r| r.id == Some(id))
}

/// Case-sensitive match against the (already trimmed) site name
pub fn by_site<'a>(registry: &'a [RegistryRecord], site: &str) -> Vec<&'a RegistryRecord> {
    filter(registry, |r| r.site_name == site)
}
