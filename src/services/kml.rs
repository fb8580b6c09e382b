//! KML placemark reader.
//!
//! Reads `<Placemark>` elements with a `<name>` and a `<Point><coordinates>`
//! child (`lon,lat[,alt]`). Coordinate strings are kept verbatim so they go
//! through the same repair as CSV exports.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::path::Path;
use thiserror::Error;

use crate::models::CoordinateRecord;
use crate::services::coordinates::UNNAMED_PLACEMARK;

/// Errors that can occur during KML parsing.
#[derive(Debug, Error)]
pub enum KmlError {
    #[error("IO error reading KML file: {0}")]
    Io(#[from] std::io::Error),
    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("Invalid coordinates for placemark '{name}': '{value}'")]
    InvalidCoordinates { name: String, value: String },
}

/// Parse a KML file from disk.
pub fn parse_kml_file(path: &Path) -> Result<Vec<CoordinateRecord>, KmlError> {
    let kml = std::fs::read_to_string(path)?;
    parse_kml(&kml)
}

/// Parse KML content into placemark rows.
///
/// Placemarks without a `<Point>` (lines, polygons) are skipped. A point
/// placemark without a name is reported as `Unnamed Placemark`, the same
/// label the CSV export uses.
pub fn parse_kml(kml: &str) -> Result<Vec<CoordinateRecord>, KmlError> {
    let mut reader = Reader::from_str(kml);
    let mut records = Vec::new();

    let mut in_placemark = false;
    let mut in_point = false;
    // Element depth below <Placemark>; only a direct <name> child is the label.
    let mut depth = 0usize;
    let mut name: Option<String> = None;
    let mut coordinates: Option<String> = None;
    let mut current_element: Option<&'static str> = None;

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let local = local_name_str(e.name().as_ref());
                if local == "Placemark" {
                    in_placemark = true;
                    in_point = false;
                    depth = 0;
                    name = None;
                    coordinates = None;
                } else if in_placemark {
                    depth += 1;
                    match local.as_str() {
                        "name" if depth == 1 => current_element = Some("name"),
                        "Point" => in_point = true,
                        "coordinates" if in_point => current_element = Some("coordinates"),
                        _ => {}
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                if let Some(elem) = current_element {
                    let text = e.unescape().unwrap_or_default().trim().to_string();
                    if !text.is_empty() {
                        match elem {
                            "name" => name = Some(text),
                            _ => coordinates = Some(text),
                        }
                    }
                }
            }
            Ok(Event::CData(ref e)) => {
                if current_element == Some("name") {
                    let text = String::from_utf8_lossy(e.as_ref()).trim().to_string();
                    if !text.is_empty() {
                        name = Some(text);
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let local = local_name_str(e.name().as_ref());
                current_element = None;
                if local == "Placemark" {
                    if let Some(coords) = coordinates.take() {
                        let name = name
                            .take()
                            .unwrap_or_else(|| UNNAMED_PLACEMARK.to_string());
                        records.push(split_coordinates(name, &coords)?);
                    }
                    in_placemark = false;
                } else if in_placemark {
                    depth = depth.saturating_sub(1);
                    if local == "Point" {
                        in_point = false;
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(KmlError::Xml(e)),
            _ => {}
        }
        buf.clear();
    }

    tracing::debug!("Parsed {} point placemarks from KML", records.len());
    Ok(records)
}

/// Split a KML `lon,lat[,alt]` tuple into a row.
fn split_coordinates(name: String, coords: &str) -> Result<CoordinateRecord, KmlError> {
    let mut parts = coords.split(',').map(str::trim);
    match (parts.next(), parts.next()) {
        (Some(lon), Some(lat)) if !lon.is_empty() && !lat.is_empty() => Ok(CoordinateRecord {
            raw_latitude: lat.to_string(),
            raw_longitude: lon.to_string(),
            city: name,
        }),
        _ => Err(KmlError::InvalidCoordinates {
            name,
            value: coords.to_string(),
        }),
    }
}

/// Extract the local name from a potentially namespaced XML element name.
/// e.g. `kml:Placemark` -> `Placemark`
fn local_name_str(full: &[u8]) -> String {
    let s = std::str::from_utf8(full).unwrap_or("");
    match s.rfind(':') {
        Some(pos) => s[pos + 1..].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_KML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
    <name>Pontos</name>
    <Placemark>
      <name>Bauru</name>
      <ExtendedData>
        <Data name="note"><value>farm</value></Data>
      </ExtendedData>
      <Point>
        <coordinates>-49.0587,-22.3146,0</coordinates>
      </Point>
    </Placemark>
    <Placemark>
      <Point><coordinates>-48.6156,-23.1044</coordinates></Point>
    </Placemark>
    <Placemark>
      <name>Road</name>
      <LineString><coordinates>-48.0,-22.0 -48.1,-22.1</coordinates></LineString>
    </Placemark>
    <Placemark>
      <name><![CDATA[Jaú]]></name>
      <Point><coordinates> -48.558 , -22.296 </coordinates></Point>
    </Placemark>
  </Document>
</kml>"#;

    #[test]
    fn test_parse_kml_points() {
        let records = parse_kml(SAMPLE_KML).unwrap();
        assert_eq!(records.len(), 3);

        assert_eq!(records[0].city, "Bauru");
        assert_eq!(records[0].raw_latitude, "-22.3146");
        assert_eq!(records[0].raw_longitude, "-49.0587");

        assert_eq!(records[1].city, UNNAMED_PLACEMARK);
        assert_eq!(records[1].raw_latitude, "-23.1044");

        assert_eq!(records[2].city, "Jaú");
        assert_eq!(records[2].raw_latitude, "-22.296");
        assert_eq!(records[2].raw_longitude, "-48.558");
    }

    #[test]
    fn test_document_name_is_not_a_placemark() {
        let records = parse_kml(SAMPLE_KML).unwrap();
        assert!(records.iter().all(|r| r.city != "Pontos"));
    }

    #[test]
    fn test_invalid_coordinates() {
        let kml = r#"<kml><Placemark><name>X</name><Point><coordinates>12</coordinates></Point></Placemark></kml>"#;
        let err = parse_kml(kml).unwrap_err();
        assert!(matches!(err, KmlError::InvalidCoordinates { .. }));
    }
}
