//! Class registry: per-class metadata and virtual dispatch
//!
//! The registry is populated in two phases. Declaration reserves class
//! descriptors and method handles so bodies emitted later may reference
//! peers and ancestors (including mutually recursive ones); definition
//! attaches the emitted bodies to the reserved handles. After program
//! load the registry is immutable.

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::compiler::code::{ClassId, MethodHandle};
use crate::compiler::CompileError;

/// Generic parameter descriptor recorded on a class
#[derive(Debug, Clone)]
pub struct GenericParamDesc {
    /// Parameter name
    pub name: String,
    /// Constraint name, if any
    pub constraint: Option<String>,
}

/// Per-class metadata
#[derive(Debug, Clone)]
pub struct ClassDescriptor {
    /// Class ID (index into the registry)
    pub id: ClassId,
    /// Class name
    pub name: String,
    /// Superclass, if any
    pub superclass: Option<ClassId>,
    /// True for abstract classes (cannot be instantiated)
    pub is_abstract: bool,
    /// Generic parameter descriptors
    pub generic_params: Vec<GenericParamDesc>,
    /// Virtual method table: name -> handle, in declaration order
    pub vtable: IndexMap<String, MethodHandle>,
    /// Property getters: name -> handle
    pub getters: IndexMap<String, MethodHandle>,
    /// Property setters: name -> handle
    pub setters: IndexMap<String, MethodHandle>,
    /// Static methods: name -> handle
    pub static_methods: IndexMap<String, MethodHandle>,
    /// Static fields: name -> storage slot
    pub static_fields: IndexMap<String, u16>,
    /// Declared instance field names, in declaration order
    pub field_names: Vec<String>,
    /// Constructor handle (always present once declaration completes;
    /// classes without an explicit constructor get a synthesized one)
    pub constructor: Option<MethodHandle>,
    /// Synthetic static initializer handle, when the class has static
    /// field initializers
    pub static_init: Option<MethodHandle>,
}

/// The class registry
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: Vec<ClassDescriptor>,
    name_to_id: FxHashMap<String, ClassId>,
}

impl ClassRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a class. Fails if the name already exists. The
    /// superclass link is attached separately once all names are known.
    pub fn declare_class(
        &mut self,
        name: &str,
        is_abstract: bool,
        generic_params: Vec<GenericParamDesc>,
    ) -> Result<ClassId, CompileError> {
        if self.name_to_id.contains_key(name) {
            return Err(CompileError::DuplicateClass(name.to_string()));
        }
        let id = self.classes.len();
        self.classes.push(ClassDescriptor {
            id,
            name: name.to_string(),
            superclass: None,
            is_abstract,
            generic_params,
            vtable: IndexMap::new(),
            getters: IndexMap::new(),
            setters: IndexMap::new(),
            static_methods: IndexMap::new(),
            static_fields: IndexMap::new(),
            field_names: Vec::new(),
            constructor: None,
            static_init: None,
        });
        self.name_to_id.insert(name.to_string(), id);
        Ok(id)
    }

    /// Link a declared class to its superclass by name
    pub fn link_superclass(
        &mut self,
        class: ClassId,
        superclass_name: &str,
    ) -> Result<(), CompileError> {
        let parent = self.name_to_id.get(superclass_name).copied().ok_or_else(|| {
            CompileError::UnknownSuperclass {
                class: self.classes[class].name.clone(),
                superclass: superclass_name.to_string(),
            }
        })?;
        self.classes[class].superclass = Some(parent);
        Ok(())
    }

    /// Get a class descriptor by ID
    pub fn get(&self, id: ClassId) -> &ClassDescriptor {
        &self.classes[id]
    }

    /// Get a mutable class descriptor by ID
    pub fn get_mut(&mut self, id: ClassId) -> &mut ClassDescriptor {
        &mut self.classes[id]
    }

    /// Look up a class by name
    pub fn get_by_name(&self, name: &str) -> Option<&ClassDescriptor> {
        self.name_to_id.get(name).map(|id| &self.classes[*id])
    }

    /// Look up a class ID by name
    pub fn id_of(&self, name: &str) -> Option<ClassId> {
        self.name_to_id.get(name).copied()
    }

    /// Number of registered classes
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// True when no classes are registered
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Iterate over all class descriptors
    pub fn iter(&self) -> impl Iterator<Item = &ClassDescriptor> {
        self.classes.iter()
    }

    /// Walk the superclass chain starting at (and including) `class`
    pub fn chain(&self, class: ClassId) -> SuperclassChain<'_> {
        SuperclassChain {
            registry: self,
            next: Some(class),
        }
    }

    /// Resolve a method by name through the superclass chain of the
    /// receiver's class. Callers treat the returned handle as the
    /// dispatch target.
    pub fn resolve_virtual(&self, class: ClassId, name: &str) -> Option<MethodHandle> {
        self.chain(class)
            .find_map(|descriptor| descriptor.vtable.get(name).copied())
    }

    /// Resolve a getter through the superclass chain
    pub fn resolve_getter(&self, class: ClassId, name: &str) -> Option<MethodHandle> {
        self.chain(class)
            .find_map(|descriptor| descriptor.getters.get(name).copied())
    }

    /// Resolve a setter through the superclass chain
    pub fn resolve_setter(&self, class: ClassId, name: &str) -> Option<MethodHandle> {
        self.chain(class)
            .find_map(|descriptor| descriptor.setters.get(name).copied())
    }

    /// Resolve a static field slot through the superclass chain,
    /// returning the class it was found on alongside the slot
    pub fn resolve_static_field(&self, class: ClassId, name: &str) -> Option<(ClassId, u16)> {
        self.chain(class).find_map(|descriptor| {
            descriptor
                .static_fields
                .get(name)
                .map(|slot| (descriptor.id, *slot))
        })
    }

    /// Resolve a static method through the superclass chain, returning
    /// the class it was found on alongside the handle
    pub fn resolve_static_method(
        &self,
        class: ClassId,
        name: &str,
    ) -> Option<(ClassId, MethodHandle)> {
        self.chain(class).find_map(|descriptor| {
            descriptor
                .static_methods
                .get(name)
                .map(|handle| (descriptor.id, *handle))
        })
    }

    /// Check the `override` markers of a class against its ancestors.
    ///
    /// Must run after every class and method signature has been
    /// declared; rejects `override` with no same-named entry reachable
    /// through the superclass chain.
    pub fn check_override(&self, class: ClassId, method: &str) -> Result<(), CompileError> {
        let descriptor = self.get(class);
        let parent = match descriptor.superclass {
            Some(parent) => parent,
            None => {
                return Err(CompileError::OverrideWithoutSuperclass {
                    class: descriptor.name.clone(),
                    method: method.to_string(),
                })
            }
        };
        if self.resolve_virtual(parent, method).is_none() {
            return Err(CompileError::OverrideMismatch {
                class: descriptor.name.clone(),
                method: method.to_string(),
            });
        }
        Ok(())
    }
}

/// Iterator over a class and its ancestors
pub struct SuperclassChain<'a> {
    registry: &'a ClassRegistry,
    next: Option<ClassId>,
}

impl<'a> Iterator for SuperclassChain<'a> {
    type Item = &'a ClassDescriptor;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let descriptor = self.registry.get(id);
        self.next = descriptor.superclass;
        Some(descriptor)
    }
}
