//! Column-role resolution for tabular address sources.
//!
//! Source files name their address columns in many ways (`CD_CEP`, `CEP`,
//! `postal_code`, ...). Roles are resolved **once** against the header,
//! from an explicit ranked pattern list; anything the resolver cannot
//! satisfy up front is a validation error, never a runtime guess during
//! row processing.

use std::collections::BTreeMap;

/// A semantic role a source column can play in enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ColumnRole {
    /// Postal code (CEP).
    PostalCode,
    /// Street name.
    Street,
    /// Neighborhood.
    Neighborhood,
    /// City.
    City,
    /// Region (state) code.
    Region,
    /// Pre-existing latitude, if the source already carries coordinates.
    Latitude,
    /// Pre-existing longitude.
    Longitude,
}

impl ColumnRole {
    /// Recognized header spellings for this role, highest rank first.
    /// Matching is case-insensitive on the trimmed header name.
    #[must_use]
    pub const fn patterns(self) -> &'static [&'static str] {
        match self {
            Self::PostalCode => &["cd_cep", "cep", "postal_code", "zip_code", "zip"],
            Self::Street => &["nm_logradouro", "logradouro", "endereco", "street", "address"],
            Self::Neighborhood => &["nm_bairro", "bairro", "neighborhood", "district"],
            Self::City => &["nm_municipio", "municipio", "cidade", "city"],
            Self::Region => &["nm_uf", "uf", "estado", "region", "state"],
            Self::Latitude => &["ds_latitude", "latitude", "lat"],
            Self::Longitude => &["ds_longitude", "longitude", "lon", "lng"],
        }
    }
}

/// All roles, in resolution order.
const ALL_ROLES: [ColumnRole; 7] = [
    ColumnRole::PostalCode,
    ColumnRole::Street,
    ColumnRole::Neighborhood,
    ColumnRole::City,
    ColumnRole::Region,
    ColumnRole::Latitude,
    ColumnRole::Longitude,
];

/// Resolved mapping from column roles to header indices.
///
/// Built once per file from the header; immutable afterwards.
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    indices: BTreeMap<ColumnRole, usize>,
}

impl ColumnMap {
    /// Resolves roles against a header.
    ///
    /// For each role the ranked pattern list is scanned in order; the
    /// first header column whose trimmed, lowercased name equals the
    /// pattern wins. A role with no matching column is simply absent —
    /// the minimal-set check is [`ColumnMap::validate`].
    #[must_use]
    pub fn resolve(header: &[String]) -> Self {
        let lowered: Vec<String> = header
            .iter()
            .map(|name| name.trim().to_lowercase())
            .collect();

        let mut indices = BTreeMap::new();
        for role in ALL_ROLES {
            let found = role
                .patterns()
                .iter()
                .find_map(|pattern| lowered.iter().position(|name| name == pattern));
            if let Some(idx) = found {
                indices.insert(role, idx);
            }
        }

        Self { indices }
    }

    /// Checks the minimal column set required by the resolvers: a postal
    /// code column, or the street+city+region triple.
    ///
    /// # Errors
    ///
    /// Returns the list of missing role names when neither set is present.
    pub fn validate(&self) -> Result<(), Vec<&'static str>> {
        if self.indices.contains_key(&ColumnRole::PostalCode) {
            return Ok(());
        }

        let missing: Vec<&'static str> = [
            (ColumnRole::Street, "street"),
            (ColumnRole::City, "city"),
            (ColumnRole::Region, "region"),
        ]
        .iter()
        .filter(|(role, _)| !self.indices.contains_key(role))
        .map(|(_, name)| *name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(missing)
        }
    }

    /// Header index for a role, if the source has a matching column.
    #[must_use]
    pub fn index(&self, role: ColumnRole) -> Option<usize> {
        self.indices.get(&role).copied()
    }

    /// Cell value for a role in the given row values, trimmed.
    /// Returns an empty string when the role or the cell is absent.
    #[must_use]
    pub fn value<'a>(&self, role: ColumnRole, values: &'a [String]) -> &'a str {
        self.index(role)
            .and_then(|idx| values.get(idx))
            .map_or("", |cell| cell.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn resolves_portuguese_names() {
        let map = ColumnMap::resolve(&header(&[
            "CD_CEP",
            "NM_LOGRADOURO",
            "NM_BAIRRO",
            "NM_MUNICIPIO",
            "NM_UF",
        ]));
        assert_eq!(map.index(ColumnRole::PostalCode), Some(0));
        assert_eq!(map.index(ColumnRole::Street), Some(1));
        assert_eq!(map.index(ColumnRole::Region), Some(4));
        assert!(map.validate().is_ok());
    }

    #[test]
    fn resolves_english_names_case_insensitively() {
        let map = ColumnMap::resolve(&header(&["Postal_Code", "Street", "City", "State"]));
        assert_eq!(map.index(ColumnRole::PostalCode), Some(0));
        assert_eq!(map.index(ColumnRole::Region), Some(3));
    }

    #[test]
    fn higher_ranked_pattern_wins() {
        // Both CD_CEP and CEP present: CD_CEP outranks CEP.
        let map = ColumnMap::resolve(&header(&["CEP", "CD_CEP"]));
        assert_eq!(map.index(ColumnRole::PostalCode), Some(1));
    }

    #[test]
    fn address_triple_satisfies_minimal_set() {
        let map = ColumnMap::resolve(&header(&["street", "city", "state", "other"]));
        assert!(map.validate().is_ok());
    }

    #[test]
    fn missing_minimal_set_reports_roles() {
        let map = ColumnMap::resolve(&header(&["street", "notes"]));
        let missing = map.validate().unwrap_err();
        assert_eq!(missing, vec!["city", "region"]);
    }

    #[test]
    fn value_returns_trimmed_cell() {
        let map = ColumnMap::resolve(&header(&["cep"]));
        let values = vec![" 01310-100 ".to_string()];
        assert_eq!(map.value(ColumnRole::PostalCode, &values), "01310-100");
        assert_eq!(map.value(ColumnRole::City, &values), "");
    }
}
