//! KNXnet/IP protocol implementation.
//!
//! This module contains the wire structures used for discovery: the frame
//! header, HPAI endpoints, description information blocks and the search and
//! description services.

pub mod constants;
pub mod dib;
pub mod frame;
pub mod services;

pub use constants::*;
pub use dib::{DeviceInfo, Dib, IndividualAddress, RawDib, ServiceFamilies, ServiceFamily};
pub use frame::{FrameBuilder, Hpai, KnxnetIpFrame, KnxnetIpHeader};
pub use services::{
    decode_request, decode_response, encode_description_request, encode_search_request,
    DescriptionRequest, DescriptionResponse, Request, Response, SearchRequest, SearchResponse,
};
