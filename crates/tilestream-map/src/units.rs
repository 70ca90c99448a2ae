macro_rules! def_units {
    ($t: ident, $doc: literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd)]
        pub struct $t<T>(pub T);

        impl<T> $t<T> {
            pub fn into_inner(self) -> T {
                self.0
            }
        }
    };
}

def_units!(
    WorldUnits,
    "Denotes that the inner `T` is given in world units (meters at the equator)."
);
def_units!(
    PixelUnits,
    "Denotes that the inner `T` is given in screen pixels."
);
