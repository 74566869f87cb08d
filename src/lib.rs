/*!
# Chemical Equipment Parameter Visualizer

A small web service that ingests CSV files describing chemical process
equipment, stores each upload as a session, and serves summary statistics,
upload history, charts and PDF reports over a JSON API.

## Architecture

### Ingestion
- **loader**: CSV Parser/Validator. Tolerant header matching, per-row
  validation; malformed rows are skipped and counted rather than failing
  the whole file.

### Data Persistence Layer
- **saving**: file-backed session store. One gzip-compressed bincode file per
  session, written to a temporary file and renamed into place so a session is
  never visible with a partial record set.
- **history**: most recent sessions of a user, newest first.

### Analysis and Rendering
- **summary**: counts, averages, minima/maxima and the type distribution.
- **report**: PDF report (title, summary table, distribution, every record).
- **graph**: PNG charts of the type distribution, flowrate histogram and
  parameter comparison.

### Web Layer
- **login**: users (argon2 password hashes) and bearer tokens.
- **app**: axum router, authentication middleware and handlers.
- **error**: mapping of domain errors to HTTP status codes.
- **client**: typed HTTP client used by the `equipctl` binary.

## REST API Endpoints

- `POST /auth/register/`, `POST /auth/login/`, `POST /auth/logout/`
- `POST /upload/` - multipart field `file` holding a `.csv`
- `GET /equipment/?session_id=` - records of a session in file order
- `GET /summary/?session_id=` - summary statistics of a session
- `GET /history/` - the five most recent sessions
- `GET /report/pdf/?session_id=` - PDF report download
- `GET /chart/{types|flowrate|parameters}/?session_id=` - PNG chart

Omitting `session_id` selects the caller's latest session.
*/

pub mod config;
pub mod equipment;
pub mod history;
pub mod loader;
pub mod saving;
pub mod summary;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod error;
#[cfg(feature = "web")]
pub mod graph;
#[cfg(feature = "web")]
pub mod login;
#[cfg(feature = "web")]
pub mod report;

#[cfg(feature = "client")]
pub mod client;

pub use equipment::*;
pub use summary::{SummaryStatistics, summarize};
