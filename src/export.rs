use std::io::Write;

use chrono::{DateTime, Utc};

use crate::catalog::{Item, COMPANY_NAME_COLUMN, WEBSITE_COLUMN};
use crate::coordinator::Decision;
use crate::error::ExportError;

/// Write items as CSV: the two required columns first, then `extra_columns`
/// in the given order. Extra values missing on an item are written empty.
pub fn write_csv<W: Write>(
    extra_columns: &[String],
    items: &[Item],
    writer: W,
) -> Result<(), ExportError> {
    if items.is_empty() {
        return Err(ExportError::Empty);
    }

    let mut wtr = csv::Writer::from_writer(writer);
    let mut header = vec![COMPANY_NAME_COLUMN, WEBSITE_COLUMN];
    header.extend(extra_columns.iter().map(String::as_str));
    wtr.write_record(&header)?;

    for item in items {
        let mut row = vec![item.company_name.as_str(), item.website_url.as_str()];
        row.extend(extra_columns.iter().map(|c| item.extra(c).unwrap_or("")));
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn to_csv_string(extra_columns: &[String], items: &[Item]) -> Result<String, ExportError> {
    let mut buf = Vec::new();
    write_csv(extra_columns, items, &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// `liked_websites_20240131_235959.csv`
pub fn export_file_name(decision: Decision, at: DateTime<Utc>) -> String {
    format!("{}_websites_{}.csv", decision, at.format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ItemCatalog;
    use chrono::TimeZone;

    #[test]
    fn writes_header_and_rows_in_catalog_column_order() {
        let source = "company_name,website,country,note\n\
                      Acme,acme.com,US,\"has, comma\"\n\
                      Beta,beta.com,DE,\n";
        let catalog = ItemCatalog::from_reader(source.as_bytes()).unwrap();

        let csv = to_csv_string(catalog.extra_columns(), catalog.items()).unwrap();
        assert_eq!(
            csv,
            "company_name,website,country,note\n\
             Acme,acme.com,US,\"has, comma\"\n\
             Beta,beta.com,DE,\n"
        );
    }

    #[test]
    fn extra_headers_round_trip_verbatim() {
        let source = "company_name, website ,  Region\nAcme,acme.com,EU\n";
        let catalog = ItemCatalog::from_reader(source.as_bytes()).unwrap();

        let csv = to_csv_string(catalog.extra_columns(), catalog.items()).unwrap();
        let mut rdr = csv::Reader::from_reader(csv.as_bytes());
        let headers: Vec<String> = rdr.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, vec!["company_name", "website", "  Region"]);
    }

    #[test]
    fn empty_export_is_refused() {
        assert!(matches!(to_csv_string(&[], &[]), Err(ExportError::Empty)));
    }

    #[test]
    fn file_name_includes_category_and_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).unwrap();
        assert_eq!(
            export_file_name(Decision::Disliked, at),
            "disliked_websites_20240131_235959.csv"
        );
    }
}
