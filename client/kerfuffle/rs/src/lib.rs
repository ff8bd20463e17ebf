//! Wire types shared between the kerfuffle server and anything that talks to
//! its REST facade: the manifest schema, the install record, and the
//! read-only views returned by `/api/v1/application*`.

pub mod entities;
