//! Per-request context passed through the middleware pipeline.
//!
//! Carries the parsed [`Request`] and a type-keyed [`Extensions`] map that
//! layers use to hand state to the layers after them, such as the cache key
//! a request was looked up under.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
};

use crate::http::Request;

/// Type-keyed map of per-request values. At most one value per type.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, returning the previous value of the same type.
    pub fn insert<T>(&mut self, value: T) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|previous| previous.downcast::<T>().ok())
            .map(|previous| *previous)
    }

    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn get_mut<T>(&mut self) -> Option<&mut T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions").field("len", &self.len()).finish()
    }
}

/// A request plus the state attached to it while it moves down the pipeline.
#[derive(Debug)]
pub struct Context {
    request: Request,
    extensions: Extensions,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            extensions: Extensions::new(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Layers may rewrite the request before forwarding it.
    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    pub fn into_request(self) -> Request {
        self.request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    #[derive(Debug, PartialEq)]
    struct Tenant(&'static str);

    #[test]
    fn extensions_are_keyed_by_type() {
        let mut extensions = Extensions::new();
        assert!(extensions.is_empty());
        assert_eq!(extensions.insert(Tenant("acme")), None);
        assert_eq!(extensions.insert(7_u32), None);
        assert_eq!(extensions.get::<Tenant>(), Some(&Tenant("acme")));
        assert_eq!(extensions.get::<u32>(), Some(&7));
        assert_eq!(extensions.get::<u64>(), None);

        assert_eq!(extensions.insert(Tenant("globex")), Some(Tenant("acme")));
        assert_eq!(extensions.len(), 2);

        if let Some(count) = extensions.get_mut::<u32>() {
            *count += 1;
        }
        assert_eq!(extensions.remove::<u32>(), Some(8));
        assert_eq!(extensions.remove::<u32>(), None);
    }

    #[test]
    fn context_exposes_request() {
        let mut ctx = Context::new(Request::new(Method::Post, "/graphql?x=1").body("{ a }"));
        assert_eq!(ctx.request().path(), "/graphql");
        ctx.request_mut().headers_mut().insert("X-Tenant", "acme");
        ctx.extensions_mut().insert(Tenant("acme"));
        assert!(ctx.extensions().get::<Tenant>().is_some());
        assert_eq!(ctx.into_request().headers().get("x-tenant"), Some("acme"));
    }
}
