//! Typed accessors for a handful of test structs, written the way a schema
//! compiler would emit them on top of the layout engine.
//!
//! ```text
//! struct Point        { x @0 :Int32; y @1 :Int32; }
//! struct Point3       { x @0 :Int32; y @1 :Int32; z @2 :Int64; label @3 :Text; }
//! struct Node         { id @0 :UInt64; name @1 :Text; children @2 :List(Node); payload @3 :Data; }
//! struct Scalars      { flag @0 :Bool; small @1 :UInt8; short @2 :Int16; medium @3 :UInt32;
//!                       big @4 :Int64; ratio @5 :Float32; precise @6 :Float64;
//!                       defaulted @7 :UInt16 = 0x1234; }
//! struct Lists        { bools @0 :List(Bool); bytes @1 :List(UInt8); shorts @2 :List(Int16);
//!                       ints @3 :List(Int32); longs @4 :List(Int64); doubles @5 :List(Float64);
//!                       voids @6 :List(Void); points @7 :List(Point3); }
//! ```
//!
//! `Point3` is `Point` after a schema change: same leading fields, more after.

#![allow(dead_code, unused_imports)]

use capnp_arena::message;

macro_rules! struct_boilerplate {
    ($data:expr, $pointers:expr) => {
        use capnp_arena::private::layout::{
            PointerBuilder, PointerReader, StructBuilder, StructReader, StructSize,
        };
        use capnp_arena::traits::{
            FromPointerBuilder, FromPointerReader, FromStructBuilder, FromStructReader,
            HasStructSize, IntoInternalStructReader, SetPointerBuilder,
        };
        use capnp_arena::{MessageSize, Result, Word};

        pub const STRUCT_SIZE: StructSize = StructSize::new($data, $pointers);

        #[derive(Copy, Clone)]
        pub struct Owned(());

        impl capnp_arena::traits::Owned for Owned {
            type Reader<'a> = Reader<'a>;
            type Builder<'a> = Builder<'a>;
        }

        impl capnp_arena::traits::OwnedStruct for Owned {
            type Reader<'a> = Reader<'a>;
            type Builder<'a> = Builder<'a>;
        }

        #[derive(Copy, Clone)]
        pub struct Reader<'a> {
            reader: StructReader<'a>,
        }

        impl<'a> FromStructReader<'a> for Reader<'a> {
            fn new(reader: StructReader<'a>) -> Self {
                Self { reader }
            }
        }

        impl<'a> FromPointerReader<'a> for Reader<'a> {
            fn get_from_pointer(
                reader: &PointerReader<'a>,
                default: Option<&'a [Word]>,
            ) -> Result<Self> {
                Ok(Self {
                    reader: reader.get_struct(default)?,
                })
            }
        }

        impl<'a> IntoInternalStructReader<'a> for Reader<'a> {
            fn into_internal_struct_reader(self) -> StructReader<'a> {
                self.reader
            }
        }

        impl SetPointerBuilder for Reader<'_> {
            fn set_pointer_builder(mut pointer: PointerBuilder<'_>, value: Self) -> Result<()> {
                pointer.set_struct(&value.reader)
            }
        }

        impl Reader<'_> {
            pub fn reborrow(&self) -> Reader<'_> {
                Reader { reader: self.reader }
            }

            pub fn total_size(&self) -> Result<MessageSize> {
                self.reader.total_size()
            }
        }

        pub struct Builder<'a> {
            builder: StructBuilder<'a>,
        }

        impl HasStructSize for Builder<'_> {
            fn struct_size() -> StructSize {
                STRUCT_SIZE
            }
        }

        impl<'a> FromStructBuilder<'a> for Builder<'a> {
            fn new(builder: StructBuilder<'a>) -> Self {
                Self { builder }
            }
        }

        impl<'a> FromPointerBuilder<'a> for Builder<'a> {
            fn init_pointer(builder: PointerBuilder<'a>, _size: u32) -> Self {
                Self {
                    builder: builder.init_struct(STRUCT_SIZE),
                }
            }

            fn get_from_pointer(
                builder: PointerBuilder<'a>,
                default: Option<&'a [Word]>,
            ) -> Result<Self> {
                Ok(Self {
                    builder: builder.get_struct(STRUCT_SIZE, default)?,
                })
            }
        }

        impl<'a> Builder<'a> {
            pub fn into_reader(self) -> Reader<'a> {
                Reader {
                    reader: self.builder.into_reader(),
                }
            }

            pub fn reborrow(&mut self) -> Builder<'_> {
                Builder {
                    builder: self.builder,
                }
            }

            pub fn reborrow_as_reader(&self) -> Reader<'_> {
                Reader {
                    reader: self.builder.into_reader(),
                }
            }
        }
    };
}

pub mod point {
    struct_boilerplate!(1, 0);

    impl Reader<'_> {
        pub fn get_x(self) -> i32 {
            self.reader.get_data_field::<i32>(0)
        }
        pub fn get_y(self) -> i32 {
            self.reader.get_data_field::<i32>(1)
        }
    }

    impl Builder<'_> {
        pub fn get_x(&self) -> i32 {
            self.builder.get_data_field::<i32>(0)
        }
        pub fn set_x(&mut self, value: i32) {
            self.builder.set_data_field::<i32>(0, value);
        }
        pub fn get_y(&self) -> i32 {
            self.builder.get_data_field::<i32>(1)
        }
        pub fn set_y(&mut self, value: i32) {
            self.builder.set_data_field::<i32>(1, value);
        }
    }
}

pub mod point3 {
    struct_boilerplate!(2, 1);

    impl<'a> Reader<'a> {
        pub fn get_x(self) -> i32 {
            self.reader.get_data_field::<i32>(0)
        }
        pub fn get_y(self) -> i32 {
            self.reader.get_data_field::<i32>(1)
        }
        pub fn get_z(self) -> i64 {
            self.reader.get_data_field::<i64>(1)
        }
        pub fn get_label(self) -> Result<capnp_arena::text::Reader<'a>> {
            FromPointerReader::get_from_pointer(&self.reader.get_pointer_field(0), None)
        }
        pub fn has_label(&self) -> bool {
            !self.reader.get_pointer_field(0).is_null()
        }
    }

    impl<'a> Builder<'a> {
        pub fn get_x(&self) -> i32 {
            self.builder.get_data_field::<i32>(0)
        }
        pub fn set_x(&mut self, value: i32) {
            self.builder.set_data_field::<i32>(0, value);
        }
        pub fn get_y(&self) -> i32 {
            self.builder.get_data_field::<i32>(1)
        }
        pub fn set_y(&mut self, value: i32) {
            self.builder.set_data_field::<i32>(1, value);
        }
        pub fn get_z(&self) -> i64 {
            self.builder.get_data_field::<i64>(1)
        }
        pub fn set_z(&mut self, value: i64) {
            self.builder.set_data_field::<i64>(1, value);
        }
        pub fn get_label(self) -> Result<capnp_arena::text::Builder<'a>> {
            FromPointerBuilder::get_from_pointer(self.builder.get_pointer_field(0), None)
        }
        pub fn set_label(&mut self, value: &str) -> Result<()> {
            self.builder.get_pointer_field(0).set_text(value)
        }
    }
}

pub mod node {
    struct_boilerplate!(1, 3);

    impl<'a> Reader<'a> {
        pub fn get_id(self) -> u64 {
            self.reader.get_data_field::<u64>(0)
        }
        pub fn get_name(self) -> Result<capnp_arena::text::Reader<'a>> {
            FromPointerReader::get_from_pointer(&self.reader.get_pointer_field(0), None)
        }
        pub fn get_children(self) -> Result<capnp_arena::struct_list::Reader<'a, Owned>> {
            FromPointerReader::get_from_pointer(&self.reader.get_pointer_field(1), None)
        }
        pub fn has_children(&self) -> bool {
            !self.reader.get_pointer_field(1).is_null()
        }
        pub fn get_payload(self) -> Result<capnp_arena::data::Reader<'a>> {
            FromPointerReader::get_from_pointer(&self.reader.get_pointer_field(2), None)
        }
    }

    impl<'a> Builder<'a> {
        pub fn get_id(&self) -> u64 {
            self.builder.get_data_field::<u64>(0)
        }
        pub fn set_id(&mut self, value: u64) {
            self.builder.set_data_field::<u64>(0, value);
        }
        pub fn set_name(&mut self, value: &str) -> Result<()> {
            self.builder.get_pointer_field(0).set_text(value)
        }
        pub fn init_name(self, size: u32) -> capnp_arena::text::Builder<'a> {
            FromPointerBuilder::init_pointer(self.builder.get_pointer_field(0), size)
        }
        pub fn init_children(self, size: u32) -> capnp_arena::struct_list::Builder<'a, Owned> {
            FromPointerBuilder::init_pointer(self.builder.get_pointer_field(1), size)
        }
        pub fn get_children(self) -> Result<capnp_arena::struct_list::Builder<'a, Owned>> {
            FromPointerBuilder::get_from_pointer(self.builder.get_pointer_field(1), None)
        }
        pub fn set_children(
            &mut self,
            value: capnp_arena::struct_list::Reader<'_, Owned>,
        ) -> Result<()> {
            SetPointerBuilder::set_pointer_builder(self.builder.get_pointer_field(1), value)
        }
        pub fn set_payload(&mut self, value: &[u8]) {
            self.builder.get_pointer_field(2).set_data(value);
        }
        pub fn init_payload(self, size: u32) -> capnp_arena::data::Builder<'a> {
            FromPointerBuilder::init_pointer(self.builder.get_pointer_field(2), size)
        }
    }
}

pub mod scalars {
    struct_boilerplate!(4, 0);

    impl Reader<'_> {
        pub fn get_flag(self) -> bool {
            self.reader.get_bool_field(0)
        }
        pub fn get_small(self) -> u8 {
            self.reader.get_data_field::<u8>(1)
        }
        pub fn get_short(self) -> i16 {
            self.reader.get_data_field::<i16>(1)
        }
        pub fn get_medium(self) -> u32 {
            self.reader.get_data_field::<u32>(1)
        }
        pub fn get_big(self) -> i64 {
            self.reader.get_data_field::<i64>(1)
        }
        pub fn get_ratio(self) -> f32 {
            self.reader.get_data_field::<f32>(4)
        }
        pub fn get_precise(self) -> f64 {
            self.reader.get_data_field::<f64>(3)
        }
        pub fn get_defaulted(self) -> u16 {
            self.reader.get_data_field_mask::<u16>(10, 0x1234)
        }
    }

    impl Builder<'_> {
        pub fn set_flag(&mut self, value: bool) {
            self.builder.set_bool_field(0, value);
        }
        pub fn set_small(&mut self, value: u8) {
            self.builder.set_data_field::<u8>(1, value);
        }
        pub fn set_short(&mut self, value: i16) {
            self.builder.set_data_field::<i16>(1, value);
        }
        pub fn set_medium(&mut self, value: u32) {
            self.builder.set_data_field::<u32>(1, value);
        }
        pub fn set_big(&mut self, value: i64) {
            self.builder.set_data_field::<i64>(1, value);
        }
        pub fn set_ratio(&mut self, value: f32) {
            self.builder.set_data_field::<f32>(4, value);
        }
        pub fn set_precise(&mut self, value: f64) {
            self.builder.set_data_field::<f64>(3, value);
        }
        pub fn get_defaulted(&self) -> u16 {
            self.builder.get_data_field_mask::<u16>(10, 0x1234)
        }
        pub fn set_defaulted(&mut self, value: u16) {
            self.builder.set_data_field_mask::<u16>(10, value, 0x1234);
        }
    }
}

pub mod lists {
    struct_boilerplate!(0, 8);

    use capnp_arena::{primitive_list, struct_list};

    macro_rules! list_field {
        ($get:ident, $init:ident, $index:expr, $list:ty) => {
            impl<'a> Reader<'a> {
                pub fn $get(self) -> Result<<$list as capnp_arena::traits::Owned>::Reader<'a>> {
                    FromPointerReader::get_from_pointer(&self.reader.get_pointer_field($index), None)
                }
            }

            impl<'a> Builder<'a> {
                pub fn $init(self, size: u32) -> <$list as capnp_arena::traits::Owned>::Builder<'a> {
                    FromPointerBuilder::init_pointer(self.builder.get_pointer_field($index), size)
                }
            }
        };
    }

    list_field!(get_bools, init_bools, 0, primitive_list::Owned<bool>);
    list_field!(get_bytes, init_bytes, 1, primitive_list::Owned<u8>);
    list_field!(get_shorts, init_shorts, 2, primitive_list::Owned<i16>);
    list_field!(get_ints, init_ints, 3, primitive_list::Owned<i32>);
    list_field!(get_longs, init_longs, 4, primitive_list::Owned<i64>);
    list_field!(get_doubles, init_doubles, 5, primitive_list::Owned<f64>);
    list_field!(get_voids, init_voids, 6, primitive_list::Owned<()>);
    list_field!(get_points, init_points, 7, struct_list::Owned<super::point3::Owned>);
}

/// Three levels of `Node`: a root with two children, the first of which has one child.
pub fn build_tree<A: message::Allocator>(message: &mut message::Builder<A>) {
    let mut root = message.init_root::<node::Builder>();
    root.set_id(1);
    root.set_name("root").unwrap();
    root.set_payload(&[1, 2, 3]);
    let mut children = root.init_children(2);
    {
        let mut left = children.reborrow().get(0);
        left.set_id(2);
        left.set_name("left").unwrap();
        let mut leaf = left.init_children(1).get(0);
        leaf.set_id(4);
        leaf.set_name("leaf").unwrap();
        leaf.set_payload(b"deep");
    }
    let mut right = children.get(1);
    right.set_id(3);
    right.set_name("right").unwrap();
}

pub fn check_tree(root: node::Reader<'_>) {
    assert_eq!(root.get_id(), 1);
    assert_eq!(root.get_name().unwrap(), "root");
    assert_eq!(root.get_payload().unwrap(), &[1, 2, 3]);

    let children = root.get_children().unwrap();
    assert_eq!(children.len(), 2);

    let left = children.get(0);
    assert_eq!(left.get_id(), 2);
    assert_eq!(left.get_name().unwrap(), "left");
    assert!(left.get_payload().unwrap().is_empty());
    let grandchildren = left.get_children().unwrap();
    assert_eq!(grandchildren.len(), 1);
    let leaf = grandchildren.get(0);
    assert_eq!(leaf.get_id(), 4);
    assert_eq!(leaf.get_name().unwrap(), "leaf");
    assert_eq!(leaf.get_payload().unwrap(), b"deep");
    assert!(!leaf.has_children());
    assert_eq!(leaf.get_children().unwrap().len(), 0);

    let right = children.get(1);
    assert_eq!(right.get_id(), 3);
    assert_eq!(right.get_name().unwrap(), "right");
    assert!(children.try_get(2).is_none());

    let ids: Vec<u64> = children.iter().map(|c| c.get_id()).collect();
    assert_eq!(ids, [2, 3]);
}
