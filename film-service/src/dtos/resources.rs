use crate::services::dispatcher::ResourceRequest;

/// Query string accepted by the resource endpoints.
///
/// `download` is a presence flag: `?download`, `?download=` and
/// `?download=1` all request an attachment. Repeated keys are tolerated;
/// the first `authorisation` wins.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ResourceQuery {
    pub authorisation: Option<String>,
    pub download: bool,
}

impl ResourceQuery {
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut query = Self::default();
        for (key, value) in pairs {
            match key.as_str() {
                "authorisation" if query.authorisation.is_none() => {
                    query.authorisation = Some(value);
                }
                "download" => query.download = true,
                _ => {}
            }
        }
        query
    }

    pub fn into_request(self, raw_id: String) -> ResourceRequest {
        ResourceRequest {
            raw_id,
            authorisation: self.authorisation,
            download: self.download,
        }
    }
}
