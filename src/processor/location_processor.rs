use crate::error::{TrackerResult, ValidationError};
use crate::mirror::MirrorHandle;
use crate::models::{LocationReport, LocationUpdate, NewLocation, NumericField};
use crate::store::LocationStore;
use tracing::{debug, warn};

pub const MAX_BUS_ID_LEN: usize = 50;

/// Validates and normalizes an inbound update, stores it, then hands a copy to
/// the mirror without waiting on it.
pub async fn process_update(
    store: &dyn LocationStore,
    mirror: &MirrorHandle,
    update: LocationUpdate,
    default_bus_id: &str,
) -> TrackerResult<LocationReport> {
    let location = match normalize(update, default_bus_id) {
        Ok(l) => l,
        Err(e) => {
            warn!("Rejected location update: {}", e);
            return Err(e.into());
        }
    };

    let report = store.append(location).await?;
    debug!(
        "Stored location {} for {}: {}, {}",
        report.id, report.bus_id, report.latitude, report.longitude
    );

    mirror.forward(&report);

    Ok(report)
}

pub fn normalize(update: LocationUpdate, default_bus_id: &str) -> Result<NewLocation, ValidationError> {
    let latitude = parse_numeric("lat", update.lat)?.ok_or(ValidationError::MissingField("lat"))?;
    // `lon` is the historical name; `lng` wins whenever it carries a value.
    let longitude = match parse_numeric("lng", update.lng)? {
        Some(v) => v,
        None => parse_numeric("lon", update.lon)?.ok_or(ValidationError::MissingField("lng"))?,
    };

    if !(-90.0..=90.0).contains(&latitude) {
        return Err(ValidationError::OutOfRange { field: "lat" });
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(ValidationError::OutOfRange { field: "lng" });
    }

    let bus_id = match update.bus_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => default_bus_id.to_string(),
    };
    if bus_id.chars().count() > MAX_BUS_ID_LEN {
        return Err(ValidationError::BusIdTooLong { max: MAX_BUS_ID_LEN });
    }

    Ok(NewLocation {
        speed: parse_numeric("speed", update.speed)?,
        accuracy: parse_numeric("accuracy", update.accuracy)?,
        bearing: parse_numeric("bearing", update.bearing)?,
        ..NewLocation::new(bus_id, latitude, longitude)
    })
}

/// Blank strings mean "not reported"; anything else must be a finite number.
fn parse_numeric(field: &'static str, value: Option<NumericField>) -> Result<Option<f64>, ValidationError> {
    let parsed = match value {
        None => return Ok(None),
        Some(NumericField::Number(f)) => f,
        Some(NumericField::Text(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse::<f64>()
                .map_err(|_| ValidationError::NotANumber { field })?
        }
        Some(NumericField::Other(_)) => return Err(ValidationError::NotANumber { field }),
    };

    if parsed.is_finite() {
        Ok(Some(parsed))
    } else {
        Err(ValidationError::NotANumber { field })
    }
}
