// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Transport-agnostic request and response types

use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;

/// Header carrying a transaction id between requests
pub const TRANSACTION_HEADER: &str = "X-ArangoDB-Trx";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

/// Response status codes used by the transaction handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Ok,
    BadRequest,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    Conflict,
    Gone,
    InternalServerError,
    ServiceUnavailable,
}

impl ResponseCode {
    pub fn as_u16(self) -> u16 {
        match self {
            ResponseCode::Ok => 200,
            ResponseCode::BadRequest => 400,
            ResponseCode::Forbidden => 403,
            ResponseCode::NotFound => 404,
            ResponseCode::MethodNotAllowed => 405,
            ResponseCode::Conflict => 409,
            ResponseCode::Gone => 410,
            ResponseCode::InternalServerError => 500,
            ResponseCode::ServiceUnavailable => 503,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            ResponseCode::Ok => "OK",
            ResponseCode::BadRequest => "Bad Request",
            ResponseCode::Forbidden => "Forbidden",
            ResponseCode::NotFound => "Not Found",
            ResponseCode::MethodNotAllowed => "Method Not Allowed",
            ResponseCode::Conflict => "Conflict",
            ResponseCode::Gone => "Gone",
            ResponseCode::InternalServerError => "Internal Server Error",
            ResponseCode::ServiceUnavailable => "Service Unavailable",
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason())
    }
}

/// An incoming request; header names are matched case-insensitively
#[derive(Debug, Clone)]
pub struct RestRequest {
    method: RequestMethod,
    database: String,
    suffixes: Vec<String>,
    headers: HashMap<String, String>,
    body: Value,
}

impl RestRequest {
    pub fn new(method: RequestMethod, database: impl Into<String>) -> Self {
        Self {
            method,
            database: database.into(),
            suffixes: Vec::new(),
            headers: HashMap::new(),
            body: Value::Null,
        }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffixes.push(suffix.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn method(&self) -> RequestMethod {
        self.method
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn suffixes(&self) -> &[String] {
        &self.suffixes
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn body(&self) -> &Value {
        &self.body
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestResponse {
    code: ResponseCode,
    headers: Vec<(String, String)>,
    body: Value,
}

impl RestResponse {
    pub fn new(code: ResponseCode, body: Value) -> Self {
        Self {
            code,
            headers: Vec::new(),
            body,
        }
    }

    /// `{"error": false, "code": 200, ...fields}`
    pub fn success(fields: Value) -> Self {
        let mut body = json!({ "error": false, "code": ResponseCode::Ok.as_u16() });
        if let (Value::Object(target), Value::Object(extra)) = (&mut body, fields) {
            target.extend(extra);
        }
        Self::new(ResponseCode::Ok, body)
    }

    /// `{"error": true, "code": N, "errorMessage": ..}`
    pub fn error(code: ResponseCode, message: impl Into<String>) -> Self {
        Self::new(
            code,
            json!({
                "error": true,
                "code": code.as_u16(),
                "errorMessage": message.into(),
            }),
        )
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn code(&self) -> ResponseCode {
        self.code
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &Value {
        &self.body
    }
}
